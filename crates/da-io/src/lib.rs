#![forbid(unsafe_code)]

use std::collections::HashMap;

use csv::{ReaderBuilder, WriterBuilder};
use da_columnar::{Column, ColumnError};
use da_frame::{DataFrame, FrameError};
use da_types::{DType, NullKind, Scalar, infer_dtype, parse_date};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IoError {
    #[error("csv input has no headers")]
    MissingHeaders,
    #[error("unexpected payload shape: {0}")]
    UnexpectedShape(String),
    #[error("field {field:?} holds a nested value that cannot be flattened")]
    NestedValue { field: String },
    #[error("fields {first:?} and {second:?} both shorten to column {column:?}")]
    FieldCollision {
        column: String,
        first: String,
        second: String,
    },
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error(transparent)]
    Column(#[from] ColumnError),
    #[error(transparent)]
    Frame(#[from] FrameError),
}

pub fn read_csv_str(input: &str) -> Result<DataFrame, IoError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .from_reader(input.as_bytes());

    let headers = reader.headers().cloned().map_err(IoError::from)?;

    if headers.is_empty() {
        return Err(IoError::MissingHeaders);
    }

    let mut buffers = vec![Vec::<Scalar>::new(); headers.len()];
    let mut row_count = 0_usize;
    for row in reader.records() {
        let record = row?;
        for (idx, values) in buffers.iter_mut().enumerate() {
            let field = record.get(idx).unwrap_or_default();
            values.push(parse_scalar(field));
        }
        row_count += 1;
    }

    let columns = headers
        .iter()
        .zip(buffers)
        .map(|(name, values)| Ok((name.to_owned(), finish_column(values)?)))
        .collect::<Result<Vec<_>, IoError>>()?;

    Ok(DataFrame::with_row_count(row_count, columns)?)
}

pub fn write_csv_string(frame: &DataFrame) -> Result<String, IoError> {
    let mut writer = WriterBuilder::new().from_writer(Vec::new());

    writer.write_record(frame.column_names())?;

    for row_idx in 0..frame.len() {
        let row = frame
            .columns()
            .map(|(_, column)| column.value(row_idx).map_or_else(String::new, scalar_to_csv))
            .collect::<Vec<_>>();
        writer.write_record(&row)?;
    }

    let bytes = writer.into_inner().map_err(|err| err.into_error())?;
    Ok(String::from_utf8(bytes)?)
}

/// Read a JSON array of flat objects. Columns appear in first-seen key order
/// and keys absent from a record read as missing.
pub fn read_json_records(input: &str) -> Result<DataFrame, IoError> {
    let payload: Value = serde_json::from_str(input)?;
    let records = payload
        .as_array()
        .ok_or_else(|| IoError::UnexpectedShape("expected a top-level array".to_owned()))?;

    let mut builder = RecordBuilder::default();
    for record in records {
        let object = record
            .as_object()
            .ok_or_else(|| IoError::UnexpectedShape("expected an array of objects".to_owned()))?;
        let row = object
            .iter()
            .map(|(field, value)| Ok((field.clone(), json_to_scalar(field, value)?)))
            .collect::<Result<Vec<_>, IoError>>()?;
        builder.push_row(row);
    }
    builder.finish()
}

/// Which work item fields to project when flattening a work-item payload.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FieldSelection {
    #[default]
    All,
    /// Reference names such as `System.State`.
    Only(Vec<String>),
}

impl FieldSelection {
    pub fn only<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Only(fields.into_iter().map(Into::into).collect())
    }

    fn admits(&self, reference: &str) -> bool {
        match self {
            Self::All => true,
            Self::Only(fields) => fields.iter().any(|field| field == reference),
        }
    }
}

/// Last dotted segment of a field reference name: `System.WorkItemType` -> `WorkItemType`.
#[must_use]
pub fn short_field_name(reference: &str) -> &str {
    reference.rsplit('.').next().unwrap_or(reference)
}

/// Flatten a work-item batch payload (`{"count": .., "value": [{"id": .., "fields": {..}}]}`).
///
/// Identity fields such as `System.AssignedTo` are reduced to their
/// `displayName`. An `Id` column is taken from the item id when the
/// projection does not already carry `System.Id`.
pub fn read_work_items_json(input: &str, selection: &FieldSelection) -> Result<DataFrame, IoError> {
    let payload: Value = serde_json::from_str(input)?;
    let items = payload
        .get("value")
        .and_then(Value::as_array)
        .ok_or_else(|| IoError::UnexpectedShape("work item payload has no `value` array".to_owned()))?;

    let mut builder = RecordBuilder::default();
    let mut origins = HashMap::<String, String>::new();

    for item in items {
        let fields = item
            .get("fields")
            .and_then(Value::as_object)
            .ok_or_else(|| IoError::UnexpectedShape("work item has no `fields` object".to_owned()))?;

        let mut row = Vec::with_capacity(fields.len() + 1);
        if !fields.contains_key("System.Id") {
            if let Some(id) = item.get("id") {
                origins
                    .entry("Id".to_owned())
                    .or_insert_with(|| "System.Id".to_owned());
                row.push(("Id".to_owned(), json_to_scalar("id", id)?));
            }
        }

        for (reference, value) in fields {
            if !selection.admits(reference) {
                continue;
            }
            let column = short_field_name(reference).to_owned();
            match origins.get(&column) {
                Some(first) if first != reference => {
                    return Err(IoError::FieldCollision {
                        column,
                        first: first.clone(),
                        second: reference.clone(),
                    });
                }
                Some(_) => {}
                None => {
                    origins.insert(column.clone(), reference.clone());
                }
            }
            row.push((column, json_to_scalar(reference, value)?));
        }
        builder.push_row(row);
    }

    builder.finish()
}

/// Flatten a team iterations payload into `Iteration_*` columns.
pub fn read_iterations_json(input: &str) -> Result<DataFrame, IoError> {
    let payload: Value = serde_json::from_str(input)?;
    let iterations = payload
        .get("value")
        .and_then(Value::as_array)
        .ok_or_else(|| IoError::UnexpectedShape("iteration payload has no `value` array".to_owned()))?;

    let mut builder = RecordBuilder::default();
    let empty = Map::new();
    for iteration in iterations {
        let attributes = iteration
            .get("attributes")
            .and_then(Value::as_object)
            .unwrap_or(&empty);
        let field = |source: Option<&Value>, name: &str| -> Result<Scalar, IoError> {
            source.map_or(Ok(Scalar::Null(NullKind::Null)), |value| json_to_scalar(name, value))
        };

        builder.push_row(vec![
            ("Iteration_Id".to_owned(), field(iteration.get("id"), "id")?),
            ("Iteration_Name".to_owned(), field(iteration.get("name"), "name")?),
            ("Iteration_Path".to_owned(), field(iteration.get("path"), "path")?),
            (
                "Iteration_Start_Date".to_owned(),
                field(attributes.get("startDate"), "startDate")?,
            ),
            (
                "Iteration_End_Date".to_owned(),
                field(attributes.get("finishDate"), "finishDate")?,
            ),
            (
                "Iteration_TimeFrame".to_owned(),
                field(attributes.get("timeFrame"), "timeFrame")?,
            ),
        ]);
    }
    builder.finish()
}

/// Work item ids from a WIQL result (`workItems[].id`) or a backlog level
/// listing (`workItems[].target.id`).
pub fn read_work_item_ids(input: &str) -> Result<Vec<i64>, IoError> {
    let payload: Value = serde_json::from_str(input)?;
    let items = payload
        .get("workItems")
        .and_then(Value::as_array)
        .ok_or_else(|| IoError::UnexpectedShape("payload has no `workItems` array".to_owned()))?;

    items
        .iter()
        .map(|item| {
            item.get("id")
                .or_else(|| item.get("target").and_then(|target| target.get("id")))
                .and_then(Value::as_i64)
                .ok_or_else(|| IoError::UnexpectedShape("work item reference without an id".to_owned()))
        })
        .collect()
}

/// Row-at-a-time accumulator that keeps first-seen column order.
#[derive(Debug, Default)]
struct RecordBuilder {
    order: Vec<String>,
    buffers: HashMap<String, Vec<Scalar>>,
    rows: usize,
}

impl RecordBuilder {
    fn push_row(&mut self, row: Vec<(String, Scalar)>) {
        for (name, value) in row {
            if !self.buffers.contains_key(&name) {
                self.order.push(name.clone());
                self.buffers
                    .insert(name.clone(), vec![Scalar::Null(NullKind::Null); self.rows]);
            }
            if let Some(buffer) = self.buffers.get_mut(&name) {
                buffer.push(value);
            }
        }

        self.rows += 1;
        for buffer in self.buffers.values_mut() {
            if buffer.len() < self.rows {
                buffer.push(Scalar::Null(NullKind::Null));
            }
        }
    }

    fn finish(mut self) -> Result<DataFrame, IoError> {
        let columns = self
            .order
            .iter()
            .map(|name| {
                let values = self.buffers.remove(name).unwrap_or_default();
                Ok((name.clone(), finish_column(values)?))
            })
            .collect::<Result<Vec<_>, IoError>>()?;
        Ok(DataFrame::with_row_count(self.rows, columns)?)
    }
}

/// Infer a column, promoting text to `Date` when every present cell parses as a date.
///
/// Cells with no common dtype (say `2` next to `"High"`) load as a text
/// column instead of failing the whole payload.
fn finish_column(values: Vec<Scalar>) -> Result<Column, ColumnError> {
    let mut present = values.iter().filter(|value| !value.is_missing()).peekable();
    let all_dates = present.peek().is_some()
        && present.all(|value| matches!(value, Scalar::Utf8(text) if parse_date(text).is_ok()));

    if all_dates {
        return Column::new(DType::Date, values);
    }
    if infer_dtype(&values).is_ok() {
        return Column::from_values(values);
    }

    let text = values
        .into_iter()
        .map(|value| match value {
            missing if missing.is_missing() => Scalar::Null(NullKind::Null),
            Scalar::Utf8(text) => Scalar::Utf8(text),
            other => Scalar::Utf8(other.to_string()),
        })
        .collect();
    Column::new(DType::Utf8, text)
}

fn json_to_scalar(field: &str, value: &Value) -> Result<Scalar, IoError> {
    match value {
        Value::Null => Ok(Scalar::Null(NullKind::Null)),
        Value::Bool(v) => Ok(Scalar::Bool(*v)),
        Value::Number(number) => Ok(match number.as_i64() {
            Some(v) => Scalar::Int64(v),
            None => number
                .as_f64()
                .map_or(Scalar::Null(NullKind::NaN), Scalar::Float64),
        }),
        Value::String(v) => Ok(Scalar::Utf8(v.clone())),
        Value::Object(object) => object
            .get("displayName")
            .and_then(Value::as_str)
            .map(|name| Scalar::Utf8(name.to_owned()))
            .ok_or_else(|| IoError::NestedValue {
                field: field.to_owned(),
            }),
        Value::Array(_) => Err(IoError::NestedValue {
            field: field.to_owned(),
        }),
    }
}

fn parse_scalar(field: &str) -> Scalar {
    let trimmed = field.trim();
    if trimmed.is_empty() {
        return Scalar::Null(NullKind::Null);
    }

    if let Ok(value) = trimmed.parse::<i64>() {
        return Scalar::Int64(value);
    }
    if let Ok(value) = trimmed.parse::<f64>() {
        return Scalar::Float64(value);
    }
    if let Ok(value) = trimmed.parse::<bool>() {
        return Scalar::Bool(value);
    }

    Scalar::Utf8(trimmed.to_owned())
}

fn scalar_to_csv(scalar: &Scalar) -> String {
    match scalar {
        Scalar::Null(_) => String::new(),
        Scalar::Float64(v) if v.is_nan() => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use da_types::{DType, NullKind, Scalar};

    use super::{
        FieldSelection, IoError, read_csv_str, read_iterations_json, read_json_records,
        read_work_item_ids, read_work_items_json, short_field_name, write_csv_string,
    };

    const WORK_ITEMS: &str = r#"{
        "count": 2,
        "value": [
            {
                "id": 11,
                "rev": 3,
                "fields": {
                    "System.WorkItemType": "Bug",
                    "System.State": "Done",
                    "System.AssignedTo": {"displayName": "Ana Lima", "uniqueName": "ana@example.com"},
                    "Microsoft.VSTS.Common.ClosedDate": "2024-01-10T15:04:05.12Z",
                    "System.CreatedDate": "2024-01-01T09:00:00Z",
                    "Microsoft.VSTS.Scheduling.Effort": 5
                }
            },
            {
                "id": 12,
                "rev": 1,
                "fields": {
                    "System.WorkItemType": "Product Backlog Item",
                    "System.State": "Active",
                    "System.CreatedDate": "2024-01-03T09:00:00Z"
                }
            }
        ]
    }"#;

    #[test]
    fn csv_round_trip_preserves_null_and_numeric_shape() {
        let input = "id,value\n1,10\n2,\n3,3.5\n";
        let frame = read_csv_str(input).expect("read");
        let value_col = frame.column("value").expect("value");

        assert_eq!(value_col.values()[1], Scalar::Null(NullKind::NaN));

        let out = write_csv_string(&frame).expect("write");
        assert!(out.starts_with("id,value\n"));
        assert!(out.contains("3,3.5"));
    }

    #[test]
    fn csv_keeps_header_order_and_promotes_date_columns() {
        let input = "State,ClosedDate,Id\nDone,2024-01-10,1\nActive,,2\n";
        let frame = read_csv_str(input).expect("read");
        assert_eq!(
            frame.column_names(),
            &["State".to_owned(), "ClosedDate".to_owned(), "Id".to_owned()]
        );
        let closed = frame.column("ClosedDate").expect("closed");
        assert_eq!(closed.dtype(), DType::Date);
        assert_eq!(
            closed.values(),
            &[
                Scalar::Date(NaiveDate::from_ymd_opt(2024, 1, 10).expect("date")),
                Scalar::Null(NullKind::NaT)
            ]
        );
    }

    #[test]
    fn json_records_fill_absent_keys_with_missing() {
        let frame = read_json_records(r#"[{"K": "A", "V": 10}, {"K": "B", "W": 1.5}]"#)
            .expect("records");
        assert_eq!(
            frame.column_names(),
            &["K".to_owned(), "V".to_owned(), "W".to_owned()]
        );
        assert!(frame.value("V", 1).expect("V").is_missing());
        assert!(frame.value("W", 0).expect("W").is_missing());

        let err = read_json_records(r#"[{"K": [1, 2]}]"#).expect_err("nested");
        assert!(matches!(err, IoError::NestedValue { .. }));
    }

    #[test]
    fn mixed_cells_fall_back_to_text_columns() {
        let frame = read_csv_str("Id,Title\n1,123\n2,Fix login\n3,\n").expect("csv");
        let title = frame.column("Title").expect("Title");
        assert_eq!(title.dtype(), DType::Utf8);
        assert_eq!(title.values()[..2], [Scalar::from("123"), Scalar::from("Fix login")]);
        assert!(title.values()[2].is_missing());
        assert_eq!(frame.column("Id").expect("Id").dtype(), DType::Int64);

        let frame = read_json_records(
            r#"[{"Id": 1, "Priority": 2}, {"Id": 2, "Priority": "High"}, {"Id": 3, "Priority": 1.5}]"#,
        )
        .expect("records");
        let priority = frame.column("Priority").expect("Priority");
        assert_eq!(priority.dtype(), DType::Utf8);
        assert_eq!(
            priority.values(),
            &[Scalar::from("2"), Scalar::from("High"), Scalar::from("1.5")]
        );
    }

    #[test]
    fn work_items_are_flattened_to_short_names() {
        let frame = read_work_items_json(WORK_ITEMS, &FieldSelection::All).expect("items");
        assert_eq!(frame.len(), 2);
        assert_eq!(frame.column_names()[0], "Id");
        assert_eq!(frame.value("Id", 1), Some(&Scalar::Int64(12)));
        assert_eq!(frame.value("AssignedTo", 0), Some(&Scalar::from("Ana Lima")));
        assert_eq!(frame.column("ClosedDate").expect("closed").dtype(), DType::Date);
        assert!(frame.value("ClosedDate", 1).expect("open item").is_missing());
        assert_eq!(frame.value("Effort", 0), Some(&Scalar::Int64(5)));
    }

    #[test]
    fn field_selection_projects_reference_names() {
        let selection = FieldSelection::only(["System.WorkItemType", "System.State"]);
        let frame = read_work_items_json(WORK_ITEMS, &selection).expect("items");
        assert_eq!(
            frame.column_names(),
            &["Id".to_owned(), "WorkItemType".to_owned(), "State".to_owned()]
        );
    }

    #[test]
    fn colliding_short_names_are_rejected() {
        let payload = r#"{"value": [{"id": 1, "fields": {"System.Title": "a", "Custom.Title": "b"}}]}"#;
        let err = read_work_items_json(payload, &FieldSelection::All).expect_err("collision");
        assert!(matches!(err, IoError::FieldCollision { column, .. } if column == "Title"));
    }

    #[test]
    fn iterations_map_to_iteration_columns() {
        let payload = r#"{"count": 1, "value": [{
            "id": "a1", "name": "Sprint 1", "path": "Proj\\Sprint 1",
            "attributes": {"startDate": "2024-01-01T00:00:00Z", "finishDate": "2024-01-14T00:00:00Z", "timeFrame": "past"}
        }]}"#;
        let frame = read_iterations_json(payload).expect("iterations");
        assert_eq!(frame.value("Iteration_Path", 0), Some(&Scalar::from("Proj\\Sprint 1")));
        assert_eq!(
            frame.column("Iteration_End_Date").expect("end").dtype(),
            DType::Date
        );
    }

    #[test]
    fn work_item_ids_from_wiql_and_backlog_payloads() {
        let wiql = r#"{"workItems": [{"id": 4, "url": "x"}, {"id": 9, "url": "y"}]}"#;
        assert_eq!(read_work_item_ids(wiql).expect("wiql"), vec![4, 9]);

        let backlog = r#"{"workItems": [{"target": {"id": 7}}]}"#;
        assert_eq!(read_work_item_ids(backlog).expect("backlog"), vec![7]);
    }

    #[test]
    fn short_names_take_last_segment() {
        assert_eq!(short_field_name("Microsoft.VSTS.Scheduling.Effort"), "Effort");
        assert_eq!(short_field_name("Id"), "Id");
    }
}
