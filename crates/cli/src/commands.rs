//! Subcommand execution against one data directory.

use std::{path::Path, sync::Arc};

use serde::Deserialize;
use serde_json::{Map, Value, json};
use snafu::ResultExt;
use tabula_store::{LayerFile, LayeredKv};
use tabula_tables::{Cursor, JoinRequest, SelectRequest, TableStore, TenantPartitioner};
use tabula_types::{
    FieldValue, Filter, FilterOp, IndexDefinition, OrderBy, Row, TableMetadata, TenantId,
    config::TabulaConfig,
};
use tracing::{info, warn};

use crate::{
    config::Command,
    error::{InputSnafu, OpenSnafu, Result, StoreSnafu, TableSnafu},
};

/// An open data directory plus the tenant commands run as.
pub struct Session {
    kv: Arc<LayeredKv>,
    tables: TableStore<LayeredKv>,
    tenant: TenantId,
}

impl Session {
    /// Opens `data`, replaying layer files and WALs.
    pub fn open(data: &Path, tenant: &str, config: TabulaConfig) -> Result<Self> {
        let kv = LayeredKv::open_with_partitioner(data, config.store, Arc::new(TenantPartitioner))
            .context(OpenSnafu { path: data })?;
        let kv = Arc::new(kv);
        let tables = TableStore::with_config(Arc::clone(&kv), config.query);
        Ok(Self { kv, tables, tenant: TenantId::new(tenant) })
    }

    /// Runs one command and returns its JSON result.
    pub fn execute(&self, command: &Command) -> Result<Value> {
        let tenant = &self.tenant;
        match command {
            Command::CreateTable { table, indexes } => {
                let indexes: Vec<IndexDefinition> =
                    indexes.iter().map(String::as_str).map(parse_index).collect::<Result<_>>()?;
                let names: Vec<String> = indexes.iter().map(|i| i.name.clone()).collect();
                self.tables
                    .create_table(tenant, &table.as_str().into(), TableMetadata::new(indexes))
                    .context(TableSnafu)?;
                Ok(json!({ "table": table, "indexes": names }))
            },
            Command::CreateIndex { table, name, fields } => {
                let index = IndexDefinition::new(name.clone(), fields.iter().cloned());
                let backfilled = self
                    .tables
                    .create_index(tenant, &table.as_str().into(), index)
                    .context(TableSnafu)?;
                Ok(json!({ "table": table, "index": name, "backfilled": backfilled }))
            },
            Command::Put { table, row_id, json } => {
                let row = parse_row(json)?;
                let value = row_json(&row);
                self.tables
                    .put_row(tenant, &table.as_str().into(), &row_id.as_str().into(), row)
                    .context(TableSnafu)?;
                Ok(json!({ "rowId": row_id, "row": value }))
            },
            Command::Update { table, row_id, json } => {
                let patch = parse_row(json)?;
                let merged = self
                    .tables
                    .update_row(tenant, &table.as_str().into(), &row_id.as_str().into(), &patch)
                    .context(TableSnafu)?;
                Ok(json!({ "rowId": row_id, "row": row_json(&merged) }))
            },
            Command::Delete { table, row_id } => {
                let removed = self
                    .tables
                    .delete_row(tenant, &table.as_str().into(), &row_id.as_str().into())
                    .context(TableSnafu)?;
                Ok(json!({ "rowId": row_id, "deleted": row_json(&removed) }))
            },
            Command::Get { table, row_id } => {
                let row = self
                    .tables
                    .get_row(tenant, &table.as_str().into(), &row_id.as_str().into())
                    .context(TableSnafu)?;
                Ok(json!({ "rowId": row_id, "row": row.as_ref().map(row_json) }))
            },
            Command::Select { table, index, prefix, filters, after, limit, order_by, desc } => {
                let order_by = order_by.as_ref().map(|column| {
                    if *desc { OrderBy::desc(column) } else { OrderBy::asc(column) }
                });
                let after =
                    after.as_deref().map(Cursor::from_token).transpose().context(TableSnafu)?;
                let request = SelectRequest::builder()
                    .tenant(tenant.clone())
                    .table(table.as_str())
                    .filters(parse_filters(filters.as_deref())?)
                    .maybe_index(index.clone())
                    .index_prefix(parse_values(prefix.as_deref())?)
                    .maybe_after(after)
                    .limit(*limit)
                    .maybe_order_by(order_by)
                    .build();
                let page = self.tables.select_rows(&request).context(TableSnafu)?;
                let rows: Vec<Value> = page
                    .rows
                    .iter()
                    .map(|(id, row)| json!({ "rowId": id.as_str(), "row": row_json(row) }))
                    .collect();
                Ok(json!({
                    "rows": rows,
                    "nextCursor": page.next_cursor.map(|cursor| cursor.to_token()),
                }))
            },
            Command::Join { left, right, on, where_left, where_right, limit } => {
                let (left_key, right_key) = on.split_once('=').ok_or_else(|| {
                    InputSnafu { message: format!("--on expects LEFT_KEY=RIGHT_KEY, got '{on}'") }
                        .build()
                })?;
                let request = JoinRequest::builder()
                    .tenant(tenant.clone())
                    .left_table(left.as_str())
                    .right_table(right.as_str())
                    .left_key(left_key.trim())
                    .right_key(right_key.trim())
                    .where_left(parse_filters(where_left.as_deref())?)
                    .where_right(parse_filters(where_right.as_deref())?)
                    .limit(*limit)
                    .build();
                let rows = self.tables.join_tables(&request).context(TableSnafu)?;
                Ok(json!({ "rows": rows.iter().map(row_json).collect::<Vec<_>>() }))
            },
            Command::Flush => {
                let report = self.kv.flush().context(StoreSnafu)?;
                let failed: Vec<Value> = report
                    .failed
                    .iter()
                    .map(|f| json!({ "tenant": f.tenant, "records": f.records, "error": f.error }))
                    .collect();
                Ok(json!({
                    "stamp": report.stamp.map(|stamp| stamp.to_string()),
                    "written": report.written.iter().map(layer_file_json).collect::<Vec<_>>(),
                    "failed": failed,
                }))
            },
            Command::Compact => {
                let outcomes = self.kv.compact().context(StoreSnafu)?;
                let merges: Vec<Value> = outcomes
                    .iter()
                    .map(|outcome| {
                        json!({
                            "tenant": outcome.tenant,
                            "sourceLayer": outcome.source_layer,
                            "mergedFiles": outcome.merged_files,
                            "records": outcome.records,
                            "output": layer_file_json(&outcome.output),
                        })
                    })
                    .collect();
                Ok(json!({ "merges": merges }))
            },
            Command::Config { .. } => {
                InputSnafu { message: "config commands do not use a data directory" }.fail()
            },
        }
    }

    /// Flushes pending writes and waits for background merges to settle.
    pub async fn close(self) -> Result<()> {
        let report = self.kv.flush().context(StoreSnafu)?;
        for failure in &report.failed {
            warn!(
                tenant = %failure.tenant,
                records = failure.records,
                error = %failure.error,
                "Flush failed on close; records stay in the WAL"
            );
        }
        self.kv.wait_for_compactions().await;
        info!(written = report.written.len(), "Session closed");
        Ok(())
    }
}

// ============================================================================
// Argument parsing
// ============================================================================

fn input_error(message: impl Into<String>) -> crate::error::CliError {
    InputSnafu { message: message.into() }.build()
}

fn parse_json(text: &str) -> Result<Value> {
    serde_json::from_str(text).map_err(|e| input_error(format!("invalid JSON: {e}")))
}

fn field_value(value: &Value) -> Result<FieldValue> {
    FieldValue::from_json(value)
        .ok_or_else(|| input_error(format!("field values must be scalars, got {value}")))
}

/// Parses `NAME=FIELD[,FIELD...]`.
fn parse_index(spec: &str) -> Result<IndexDefinition> {
    let (name, fields) = spec
        .split_once('=')
        .ok_or_else(|| input_error(format!("--index expects NAME=FIELDS, got '{spec}'")))?;
    let fields: Vec<&str> =
        fields.split(',').map(str::trim).filter(|field| !field.is_empty()).collect();
    if name.trim().is_empty() || fields.is_empty() {
        return Err(input_error(format!("--index expects NAME=FIELDS, got '{spec}'")));
    }
    Ok(IndexDefinition::new(name.trim(), fields))
}

/// Parses a flat JSON object into a row.
fn parse_row(text: &str) -> Result<Row> {
    let Value::Object(object) = parse_json(text)? else {
        return Err(input_error("a row must be a JSON object"));
    };
    object.iter().map(|(column, value)| Ok((column.clone(), field_value(value)?))).collect()
}

/// Parses a JSON array of scalars; absent means empty.
fn parse_values(text: Option<&str>) -> Result<Vec<FieldValue>> {
    let Some(text) = text else { return Ok(Vec::new()) };
    let Value::Array(values) = parse_json(text)? else {
        return Err(input_error("expected a JSON array of values"));
    };
    values.iter().map(field_value).collect()
}

#[derive(Deserialize)]
struct FilterArg {
    column: String,
    op: String,
    #[serde(default)]
    value: Value,
}

/// Parses a JSON array of `{"column", "op", "value"}` objects.
///
/// Operators: `=`, `!=`, `>`, `>=`, `<`, `<=`, `in`, `notIn`. Membership
/// operators take an array value.
fn parse_filters(text: Option<&str>) -> Result<Vec<Filter>> {
    let Some(text) = text else { return Ok(Vec::new()) };
    let args: Vec<FilterArg> = serde_json::from_str(text)
        .map_err(|e| input_error(format!("filters must be a JSON array of objects: {e}")))?;
    args.into_iter()
        .map(|arg| {
            let op = match arg.op.as_str() {
                "=" | "==" => FilterOp::Eq(field_value(&arg.value)?),
                "!=" => FilterOp::NotEq(field_value(&arg.value)?),
                ">" => FilterOp::Gt(field_value(&arg.value)?),
                ">=" => FilterOp::Gte(field_value(&arg.value)?),
                "<" => FilterOp::Lt(field_value(&arg.value)?),
                "<=" => FilterOp::Lte(field_value(&arg.value)?),
                "in" | "notIn" => {
                    let Value::Array(values) = &arg.value else {
                        return Err(input_error(format!("'{}' expects an array", arg.op)));
                    };
                    let values = values.iter().map(field_value).collect::<Result<Vec<_>>>()?;
                    if arg.op == "in" { FilterOp::In(values) } else { FilterOp::NotIn(values) }
                },
                other => return Err(input_error(format!("unknown filter operator '{other}'"))),
            };
            Ok(Filter::new(arg.column, op))
        })
        .collect()
}

// ============================================================================
// Output
// ============================================================================

fn row_json(row: &Row) -> Value {
    Value::Object(row.iter().map(|(k, v)| (k.clone(), v.to_json())).collect::<Map<_, _>>())
}

fn layer_file_json(file: &LayerFile) -> Value {
    json!({
        "tenant": file.tenant,
        "layer": file.layer,
        "stamp": file.stamp.to_string(),
        "path": file.path.display().to_string(),
    })
}
