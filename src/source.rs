use std::path::Path;

use tracing::info;

use crate::error::{Result, TableError};
use crate::schema::{ColumnType, Row, Schema, Value};

/// A finite, ordered row sequence conforming to a schema -- the producer's
/// input, loaded once before streaming begins.
#[derive(Debug, Clone)]
pub struct SourceFrame {
    pub schema: Schema,
    pub rows: Vec<Row>,
}

impl SourceFrame {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Name of the derived cumulative time-offset column
pub const T_OFFSET: &str = "T_Offset";
const DELTA_T: &str = "Delta_T";

/// The well-log column layout streamed to viewers
pub fn well_log_schema() -> Schema {
    let columns = [
        ("Depth", ColumnType::Integer),
        ("Gamma_ray", ColumnType::Float),
        ("Shale_Volume", ColumnType::Float),
        ("Restivity", ColumnType::Float),
        (DELTA_T, ColumnType::Float),
        (T_OFFSET, ColumnType::Float),
        ("Vp", ColumnType::Float),
        ("Vs", ColumnType::Float),
        ("Density", ColumnType::Float),
        ("Density_Calculated", ColumnType::Float),
        ("Neuron_Porosity", ColumnType::Float),
        ("Density_Porosity", ColumnType::Float),
        ("Possions_Ratio", ColumnType::Float),
        ("Classification", ColumnType::Integer),
    ];
    Schema::new(
        columns
            .into_iter()
            .map(|(name, ty)| (name.to_string(), ty))
            .collect(),
    )
    .expect("well-log schema is statically valid")
}

/// Load the well-log CSV into a `SourceFrame` matching
/// [`well_log_schema`]. `T_Offset` is not read from the file; it is derived
/// as the running sum of `Delta_T`.
///
/// # Errors
///
/// Returns `Io`/`SourceCsv` on read failures, `SourceParse` if a required
/// column is missing or a cell doesn't parse, `EmptySource` for a file with
/// no data rows.
pub fn load_well_log(path: impl AsRef<Path>) -> Result<SourceFrame> {
    let path = path.as_ref();
    let schema = well_log_schema();
    let mut reader = csv::Reader::from_path(path)?;

    let headers = reader.headers()?.clone();
    let mut indices = Vec::with_capacity(schema.len());
    for (name, _) in schema.columns() {
        if name == T_OFFSET {
            indices.push(None);
            continue;
        }
        let idx = headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| TableError::SourceParse(format!("missing column '{name}'")))?;
        indices.push(Some(idx));
    }

    let mut rows = Vec::new();
    let mut t_offset = 0.0_f64;
    for (line, record) in reader.records().enumerate() {
        let record = record?;
        let mut row = Row::with_capacity(schema.len());
        let mut delta_t = 0.0_f64;

        for ((name, ty), idx) in schema.columns().iter().zip(&indices) {
            let Some(idx) = idx else {
                // T_Offset placeholder, filled after Delta_T is known
                row.push(Value::Float(0.0));
                continue;
            };
            let cell = record.get(*idx).unwrap_or("").trim();
            let value = parse_cell(cell, *ty).ok_or_else(|| {
                TableError::SourceParse(format!(
                    "row {}: column '{}' has non-{:?} value '{}'",
                    line + 1,
                    name,
                    ty,
                    cell
                ))
            })?;
            if name == DELTA_T {
                if let Value::Float(v) = value {
                    delta_t = v;
                }
            }
            row.push(value);
        }

        t_offset += delta_t;
        let offset_idx = schema
            .columns()
            .iter()
            .position(|(name, _)| name == T_OFFSET)
            .expect("schema contains T_Offset");
        row[offset_idx] = Value::Float(t_offset);
        rows.push(row);
    }

    if rows.is_empty() {
        return Err(TableError::EmptySource);
    }
    info!("Loaded {} well-log rows from {}", rows.len(), path.display());
    Ok(SourceFrame { schema, rows })
}

fn parse_cell(cell: &str, ty: ColumnType) -> Option<Value> {
    match ty {
        ColumnType::Integer => cell
            .parse::<i64>()
            .ok()
            // Integer columns sometimes arrive as "2400.0"
            .or_else(|| cell.parse::<f64>().ok().map(|v| v as i64))
            .map(Value::Int),
        ColumnType::Float => cell.parse::<f64>().ok().map(Value::Float),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    const SAMPLE: &str = "\
Depth,Gamma_ray,Shale_Volume,Restivity,Delta_T,Vp,Vs,Density,Density_Calculated,Neuron_Porosity,Density_Porosity,Possions_Ratio,Classification
2400,85.5,0.32,1.2,100.0,3.1,1.6,2.45,2.40,0.21,0.19,0.29,1
2401,90.0,0.35,1.1,50.0,3.2,1.7,2.46,2.41,0.22,0.20,0.30,2
2402,88.2,0.33,1.3,25.0,3.0,1.5,2.44,2.39,0.20,0.18,0.28,1
";

    fn write_sample(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn loads_rows_matching_schema() {
        let file = write_sample(SAMPLE);
        let frame = load_well_log(file.path()).unwrap();
        assert_eq!(frame.schema, well_log_schema());
        assert_eq!(frame.len(), 3);
        for row in &frame.rows {
            frame.schema.check_row("well_log", row).unwrap();
        }
        assert_eq!(frame.rows[0][0], Value::Int(2400));
        assert_eq!(frame.rows[2][13], Value::Int(1));
    }

    #[test]
    fn t_offset_is_cumulative_delta_t() {
        let file = write_sample(SAMPLE);
        let frame = load_well_log(file.path()).unwrap();
        let offset_idx = 5;
        assert_eq!(frame.rows[0][offset_idx], Value::Float(100.0));
        assert_eq!(frame.rows[1][offset_idx], Value::Float(150.0));
        assert_eq!(frame.rows[2][offset_idx], Value::Float(175.0));
    }

    #[test]
    fn missing_column_is_an_error() {
        let file = write_sample("Depth,Gamma_ray\n2400,85.5\n");
        assert!(matches!(
            load_well_log(file.path()),
            Err(TableError::SourceParse(msg)) if msg.contains("Shale_Volume")
        ));
    }

    #[test]
    fn header_only_file_is_empty_source() {
        let header = SAMPLE.lines().next().unwrap();
        let file = write_sample(&format!("{header}\n"));
        assert!(matches!(
            load_well_log(file.path()),
            Err(TableError::EmptySource)
        ));
    }
}
