//! Output shaping applied to records before they are resolved
//!
//! Three optional properties reshape what gets written:
//! - `dataField`: replace the record by one of its fields (object or array of objects)
//! - `fields`: keep only the listed fields
//! - `dataTemplate`: render a JSON template against the record
//!
//! They run in that order. Templates understand `{{.path.to.field}}`,
//! `{{json .path}}` and `{{.}}` placeholders and must render to a JSON object
//! or an array of objects.

use crate::config::RedisSinkConfig;
use crate::error::{ConnectorError, ConnectorResult};
use crate::record::{value_to_string, Record};
use serde_json::Value;

/// Compiled output shaping options
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransformOptions {
    data_field: Option<String>,
    fields: Vec<String>,
    template: Option<Template>,
}

impl TransformOptions {
    /// Compile the shaping options of a configuration
    ///
    /// Template syntax errors surface here, at provisioning time.
    pub fn from_config(config: &RedisSinkConfig) -> ConnectorResult<Self> {
        let template = config
            .data_template
            .as_deref()
            .map(Template::parse)
            .transpose()?;

        Ok(Self {
            data_field: config.data_field.clone(),
            fields: config.fields.clone(),
            template,
        })
    }

    /// Whether records pass through untouched
    pub fn is_identity(&self) -> bool {
        self.data_field.is_none() && self.fields.is_empty() && self.template.is_none()
    }

    /// Shape one incoming record into the record(s) to write
    pub fn apply(&self, record: Record) -> ConnectorResult<Vec<Record>> {
        if self.is_identity() {
            return Ok(vec![record]);
        }

        let mut records = match &self.data_field {
            Some(field) => extract_data_field(record, field)?,
            None => vec![record],
        };

        if !self.fields.is_empty() {
            records = records
                .into_iter()
                .map(|record| self.select_fields(record))
                .collect();
        }

        if let Some(template) = &self.template {
            let mut rendered = Vec::with_capacity(records.len());
            for record in &records {
                rendered.extend(template.render_records(record)?);
            }
            records = rendered;
        }

        Ok(records)
    }

    fn select_fields(&self, mut record: Record) -> Record {
        let mut selected = Record::new();
        for field in &self.fields {
            if let Some(value) = record.remove(field) {
                selected.insert(field.clone(), value);
            }
        }
        selected
    }
}

fn extract_data_field(mut record: Record, field: &str) -> ConnectorResult<Vec<Record>> {
    match record.remove(field) {
        Some(Value::Object(inner)) => Ok(vec![inner]),
        Some(Value::Array(items)) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(inner) => Ok(inner),
                other => Err(ConnectorError::Transform(format!(
                    "dataField {} must hold objects, found {}",
                    field, other
                ))),
            })
            .collect(),
        Some(other) => Err(ConnectorError::Transform(format!(
            "dataField {} must hold an object or an array of objects, found {}",
            field, other
        ))),
        None => Err(ConnectorError::Transform(format!(
            "dataField {} does not exist in data",
            field
        ))),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Text(String),
    Field { path: Vec<String>, json: bool },
}

/// Parsed `dataTemplate`
#[derive(Debug, Clone, PartialEq)]
struct Template {
    segments: Vec<Segment>,
}

impl Template {
    fn parse(source: &str) -> ConnectorResult<Self> {
        let mut segments = Vec::new();
        let mut rest = source;

        while let Some(start) = rest.find("{{") {
            if start > 0 {
                segments.push(Segment::Text(rest[..start].to_string()));
            }
            let after_open = &rest[start + 2..];
            let end = after_open.find("}}").ok_or_else(|| {
                ConnectorError::validation(format!("unclosed action in dataTemplate: {}", source))
            })?;
            segments.push(parse_action(after_open[..end].trim())?);
            rest = &after_open[end + 2..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Text(rest.to_string()));
        }

        Ok(Self { segments })
    }

    fn render(&self, record: &Record) -> String {
        let root = Value::Object(record.clone());
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Field { path, json } => {
                    let value = lookup(&root, path);
                    match (value, json) {
                        (Some(v), true) => out.push_str(&v.to_string()),
                        (None, true) => out.push_str("null"),
                        (Some(v), false) => {
                            out.push_str(&value_to_string(v).unwrap_or_else(|| v.to_string()))
                        }
                        (None, false) => {}
                    }
                }
            }
        }
        out
    }

    fn render_records(&self, record: &Record) -> ConnectorResult<Vec<Record>> {
        let rendered = self.render(record);
        let value: Value = serde_json::from_str(&rendered).map_err(|e| {
            ConnectorError::Transform(format!(
                "dataTemplate output is not valid JSON ({}): {}",
                e, rendered
            ))
        })?;

        match value {
            Value::Object(map) => Ok(vec![map]),
            Value::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Value::Object(map) => Ok(map),
                    other => Err(ConnectorError::Transform(format!(
                        "dataTemplate output array must hold objects, found {}",
                        other
                    ))),
                })
                .collect(),
            other => Err(ConnectorError::Transform(format!(
                "dataTemplate output must be a JSON object, found {}",
                other
            ))),
        }
    }
}

fn parse_action(action: &str) -> ConnectorResult<Segment> {
    let (expr, json) = match action.strip_prefix("json ") {
        Some(expr) => (expr.trim(), true),
        None => (action, false),
    };

    let Some(path) = expr.strip_prefix('.') else {
        return Err(ConnectorError::validation(format!(
            "unsupported dataTemplate action '{{{{{}}}}}'",
            action
        )));
    };

    let path: Vec<String> = if path.is_empty() {
        Vec::new()
    } else {
        path.split('.').map(str::to_string).collect()
    };
    if path.iter().any(|part| part.is_empty() || part.contains(char::is_whitespace)) {
        return Err(ConnectorError::validation(format!(
            "unsupported dataTemplate action '{{{{{}}}}}'",
            action
        )));
    }

    Ok(Segment::Field { path, json })
}

fn lookup<'a>(value: &'a Value, path: &[String]) -> Option<&'a Value> {
    path.iter().try_fold(value, |current, part| current.get(part.as_str()))
}
