//! Direct-to-SQL upsert strategies
//!
//! Dedicated-table jobs bypass the REST sink for fact rows and write straight
//! to the warehouse: either a full truncate-and-reload, or a staging-table
//! merge. Tables follow the `<prefix>_temp` (staging) / `<prefix>_data`
//! (final) convention and carry `date_created`/`date_modified` audit columns.
//!
//! The merge statement is built dynamically from the payload's column list
//! minus the key columns. Every identifier that ends up in SQL text is
//! validated first; callers must keep key columns free of characters that
//! break identifier quoting.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::{debug, info, warn};

use super::SinkError;
use crate::frame::{Cell, Frame};

/// Keep comfortably below PostgreSQL's 65535-bind statement limit
const MAX_BINDS_PER_STATEMENT: usize = 60_000;

/// Placement of one dedicated table pair
#[derive(Debug, Clone)]
pub struct SqlTableSpec {
    pub schema: String,
    pub table_prefix: String,
    /// Columns the merge matches on
    pub key_columns: Vec<String>,
}

/// Inferred SQL type of one payload column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnType {
    Text,
    Double,
    Date,
    Timestamp,
    TimestampTz,
}

impl ColumnType {
    fn sql(self) -> &'static str {
        match self {
            ColumnType::Text => "TEXT",
            ColumnType::Double => "DOUBLE PRECISION",
            ColumnType::Date => "DATE",
            ColumnType::Timestamp => "TIMESTAMP",
            ColumnType::TimestampTz => "TIMESTAMPTZ",
        }
    }

    fn of_cell(cell: &Cell) -> Option<Self> {
        match cell {
            Cell::Null => None,
            Cell::Text(_) => Some(ColumnType::Text),
            Cell::Number(_) => Some(ColumnType::Double),
            Cell::Date(_) => Some(ColumnType::Date),
            Cell::DateTime(_) => Some(ColumnType::Timestamp),
            Cell::Instant(_) => Some(ColumnType::TimestampTz),
        }
    }
}

/// Reject identifiers that would break double-quoted SQL identifiers
pub fn check_identifier(name: &str) -> Result<(), SinkError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ' ' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(SinkError::InvalidIdentifier(name.to_string()))
    }
}

fn quote(name: &str) -> String {
    format!("\"{name}\"")
}

/// Build the dynamic merge statement: matched rows with any differing
/// non-key column are updated (stamped `date_modified`), unmatched rows are
/// inserted (stamped `date_created`), final-table rows absent from staging
/// are left untouched.
pub fn build_merge_sql(
    spec: &SqlTableSpec,
    columns: &[String],
) -> Result<String, SinkError> {
    check_identifier(&spec.schema)?;
    check_identifier(&spec.table_prefix)?;
    for column in columns {
        check_identifier(column)?;
    }
    for key in &spec.key_columns {
        check_identifier(key)?;
        if !columns.contains(key) {
            return Err(SinkError::MissingKeyColumn(key.clone()));
        }
    }

    let data = format!("{}.{}", quote(&spec.schema), quote(&format!("{}_data", spec.table_prefix)));
    let temp = format!("{}.{}", quote(&spec.schema), quote(&format!("{}_temp", spec.table_prefix)));

    let non_keys: Vec<&String> = columns
        .iter()
        .filter(|c| !spec.key_columns.contains(c))
        .collect();

    let on_clause = spec
        .key_columns
        .iter()
        .map(|k| format!("d.{key} = s.{key}", key = quote(k)))
        .collect::<Vec<_>>()
        .join(" AND ");

    let insert_columns = columns
        .iter()
        .map(|c| quote(c))
        .chain(std::iter::once(quote("date_created")))
        .collect::<Vec<_>>()
        .join(", ");
    let insert_values = columns
        .iter()
        .map(|c| format!("s.{}", quote(c)))
        .chain(std::iter::once("NOW()".to_string()))
        .collect::<Vec<_>>()
        .join(", ");

    let mut sql = format!("MERGE INTO {data} AS d\nUSING {temp} AS s\nON {on_clause}\n");

    if !non_keys.is_empty() {
        let changed = non_keys
            .iter()
            .map(|c| format!("d.{col} IS DISTINCT FROM s.{col}", col = quote(c)))
            .collect::<Vec<_>>()
            .join(" OR ");
        let updates = non_keys
            .iter()
            .map(|c| format!("{col} = s.{col}", col = quote(c)))
            .chain(std::iter::once(format!("{} = NOW()", quote("date_modified"))))
            .collect::<Vec<_>>()
            .join(", ");
        sql.push_str(&format!(
            "WHEN MATCHED AND ({changed}) THEN\n  UPDATE SET {updates}\n"
        ));
    }

    sql.push_str(&format!(
        "WHEN NOT MATCHED THEN\n  INSERT ({insert_columns}) VALUES ({insert_values})"
    ));

    Ok(sql)
}

/// SQL sink over one dedicated table pair
pub struct SqlSink {
    pool: PgPool,
    spec: SqlTableSpec,
}

impl SqlSink {
    pub fn new(pool: PgPool, spec: SqlTableSpec) -> Result<Self, SinkError> {
        check_identifier(&spec.schema)?;
        check_identifier(&spec.table_prefix)?;
        for key in &spec.key_columns {
            check_identifier(key)?;
        }
        Ok(Self { pool, spec })
    }

    pub fn spec(&self) -> &SqlTableSpec {
        &self.spec
    }

    fn data_table(&self) -> String {
        format!(
            "{}.{}",
            quote(&self.spec.schema),
            quote(&format!("{}_data", self.spec.table_prefix))
        )
    }

    fn temp_table(&self) -> String {
        format!(
            "{}.{}",
            quote(&self.spec.schema),
            quote(&format!("{}_temp", self.spec.table_prefix))
        )
    }

    /// Infer column types and verify every cell is compatible
    fn column_types(frame: &Frame) -> Result<Vec<ColumnType>, SinkError> {
        let mut types = Vec::with_capacity(frame.columns().len());
        for (idx, column) in frame.columns().iter().enumerate() {
            let inferred = frame
                .rows()
                .iter()
                .find_map(|row| ColumnType::of_cell(&row[idx]))
                .unwrap_or(ColumnType::Text);

            let consistent = frame.rows().iter().all(|row| {
                ColumnType::of_cell(&row[idx]).map_or(true, |t| t == inferred)
            });
            if !consistent {
                return Err(SinkError::TypeMismatch {
                    column: column.clone(),
                });
            }
            types.push(inferred);
        }
        Ok(types)
    }

    /// Idempotently create the schema and both tables for this payload shape.
    ///
    /// Concurrent creation races surface as "already exists"; those are
    /// logged and tolerated.
    pub async fn ensure_tables(&self, frame: &Frame) -> Result<(), SinkError> {
        for column in frame.columns() {
            check_identifier(column)?;
        }
        let types = Self::column_types(frame)?;

        let column_defs = frame
            .columns()
            .iter()
            .zip(types.iter())
            .map(|(name, ty)| format!("{} {}", quote(name), ty.sql()))
            .collect::<Vec<_>>()
            .join(", ");

        let statements = [
            format!("CREATE SCHEMA IF NOT EXISTS {}", quote(&self.spec.schema)),
            format!(
                "CREATE TABLE IF NOT EXISTS {} ({column_defs}, {} TIMESTAMPTZ, {} TIMESTAMPTZ)",
                self.data_table(),
                quote("date_created"),
                quote("date_modified"),
            ),
            format!("DROP TABLE IF EXISTS {}", self.temp_table()),
            format!("CREATE TABLE {} ({column_defs})", self.temp_table()),
        ];

        for statement in statements {
            if let Err(e) = sqlx::query(&statement).execute(&self.pool).await {
                if e.to_string().contains("already exists") {
                    warn!("object already exists, continuing: {e}");
                } else {
                    return Err(e.into());
                }
            }
        }

        Ok(())
    }

    /// Drop everything and load the full payload, stamping `date_created`.
    /// After the run the final table holds exactly `frame.len()` rows.
    pub async fn full_reload(&self, frame: &Frame) -> Result<u64, SinkError> {
        self.ensure_tables(frame).await?;

        sqlx::query(&format!("TRUNCATE TABLE {}", self.data_table()))
            .execute(&self.pool)
            .await?;

        let inserted = self.bulk_insert(&self.data_table(), frame, true).await?;
        info!(rows = inserted, table = %self.data_table(), "full reload complete");
        Ok(inserted)
    }

    /// Stage the payload and merge it into the final table
    pub async fn merge_upsert(&self, frame: &Frame) -> Result<u64, SinkError> {
        self.ensure_tables(frame).await?;

        self.bulk_insert(&self.temp_table(), frame, false).await?;

        let merge = build_merge_sql(&self.spec, frame.columns())?;
        debug!(sql = %merge, "running merge");
        let result = sqlx::query(&merge).execute(&self.pool).await?;

        info!(
            affected = result.rows_affected(),
            table = %self.data_table(),
            "merge upsert complete"
        );
        Ok(result.rows_affected())
    }

    async fn bulk_insert(
        &self,
        table: &str,
        frame: &Frame,
        stamp_created: bool,
    ) -> Result<u64, SinkError> {
        if frame.is_empty() {
            return Ok(0);
        }
        let types = Self::column_types(frame)?;

        let mut column_list = frame
            .columns()
            .iter()
            .map(|c| quote(c))
            .collect::<Vec<_>>();
        if stamp_created {
            column_list.push(quote("date_created"));
        }

        let chunk_rows = (MAX_BINDS_PER_STATEMENT / frame.columns().len().max(1)).max(1);
        let mut total = 0u64;

        for chunk in frame.rows().chunks(chunk_rows) {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
                "INSERT INTO {table} ({}) ",
                column_list.join(", ")
            ));

            builder.push_values(chunk.iter(), |mut b, row| {
                for (cell, ty) in row.iter().zip(types.iter()) {
                    match (cell, ty) {
                        (Cell::Null, ColumnType::Text) => {
                            b.push_bind(None::<String>);
                        },
                        (Cell::Null, ColumnType::Double) => {
                            b.push_bind(None::<f64>);
                        },
                        (Cell::Null, ColumnType::Date) => {
                            b.push_bind(None::<NaiveDate>);
                        },
                        (Cell::Null, ColumnType::Timestamp) => {
                            b.push_bind(None::<NaiveDateTime>);
                        },
                        (Cell::Null, ColumnType::TimestampTz) => {
                            b.push_bind(None::<DateTime<Utc>>);
                        },
                        (Cell::Text(v), _) => {
                            b.push_bind(v.clone());
                        },
                        (Cell::Number(v), _) => {
                            b.push_bind(*v);
                        },
                        (Cell::Date(v), _) => {
                            b.push_bind(*v);
                        },
                        (Cell::DateTime(v), _) => {
                            b.push_bind(*v);
                        },
                        (Cell::Instant(v), _) => {
                            b.push_bind(*v);
                        },
                    }
                }
                if stamp_created {
                    b.push("NOW()");
                }
            });

            let result = builder.build().execute(&self.pool).await?;
            total += result.rows_affected();
        }

        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> SqlTableSpec {
        SqlTableSpec {
            schema: "energy".to_string(),
            table_prefix: "oil_px".to_string(),
            key_columns: vec!["Country".to_string(), "Date".to_string()],
        }
    }

    fn columns() -> Vec<String> {
        vec![
            "Country".to_string(),
            "Date".to_string(),
            "Value".to_string(),
        ]
    }

    #[test]
    fn test_check_identifier() {
        assert!(check_identifier("Export Date").is_ok());
        assert!(check_identifier("oil_px").is_ok());
        assert!(check_identifier("").is_err());
        assert!(check_identifier("bad\"col").is_err());
        assert!(check_identifier("semi;colon").is_err());
    }

    #[test]
    fn test_build_merge_sql_shape() {
        let sql = build_merge_sql(&spec(), &columns()).unwrap();

        assert!(sql.contains("MERGE INTO \"energy\".\"oil_px_data\" AS d"));
        assert!(sql.contains("USING \"energy\".\"oil_px_temp\" AS s"));
        assert!(sql.contains("ON d.\"Country\" = s.\"Country\" AND d.\"Date\" = s.\"Date\""));
        // Unchanged rows never receive a spurious date_modified stamp
        assert!(sql.contains("WHEN MATCHED AND (d.\"Value\" IS DISTINCT FROM s.\"Value\")"));
        assert!(sql.contains("UPDATE SET \"Value\" = s.\"Value\", \"date_modified\" = NOW()"));
        assert!(sql.contains(
            "INSERT (\"Country\", \"Date\", \"Value\", \"date_created\") \
             VALUES (s.\"Country\", s.\"Date\", s.\"Value\", NOW())"
        ));
        // Upsert, not sync: no DELETE branch
        assert!(!sql.contains("DELETE"));
    }

    #[test]
    fn test_build_merge_sql_all_key_columns() {
        let spec = SqlTableSpec {
            key_columns: columns(),
            ..spec()
        };
        let sql = build_merge_sql(&spec, &columns()).unwrap();

        // Nothing to update when every column is a key
        assert!(!sql.contains("WHEN MATCHED"));
        assert!(sql.contains("WHEN NOT MATCHED"));
    }

    #[test]
    fn test_build_merge_sql_missing_key() {
        let spec = SqlTableSpec {
            key_columns: vec!["Region".to_string()],
            ..spec()
        };
        assert!(matches!(
            build_merge_sql(&spec, &columns()),
            Err(SinkError::MissingKeyColumn(k)) if k == "Region"
        ));
    }

    #[test]
    fn test_build_merge_sql_rejects_bad_identifier() {
        let spec = SqlTableSpec {
            table_prefix: "px\"; DROP TABLE".to_string(),
            ..spec()
        };
        assert!(matches!(
            build_merge_sql(&spec, &columns()),
            Err(SinkError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn test_column_types_inference_and_mismatch() {
        let mut frame = Frame::new(vec!["Country", "Value"]);
        frame
            .push_row(vec![Cell::Null, Cell::Number(1.0)])
            .unwrap();
        frame
            .push_row(vec![Cell::text("FRA"), Cell::Number(2.0)])
            .unwrap();

        let types = SqlSink::column_types(&frame).unwrap();
        assert_eq!(types, vec![ColumnType::Text, ColumnType::Double]);

        frame
            .push_row(vec![Cell::text("DEU"), Cell::text("oops")])
            .unwrap();
        assert!(matches!(
            SqlSink::column_types(&frame),
            Err(SinkError::TypeMismatch { column }) if column == "Value"
        ));
    }
}
