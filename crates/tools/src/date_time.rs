//! Date and time tools.

use async_trait::async_trait;
use chrono::{Duration, Local, NaiveDateTime};
use parley_core::error::ToolError;
use parley_core::tool::{Tool, ToolContext, ToolMetadata, ToolOutput};

const FORMAT: &str = "%Y-%m-%d %H:%M:%S (%A)";

pub struct CurrentDateTimeTool;

#[async_trait]
impl Tool for CurrentDateTimeTool {
    fn metadata(&self) -> ToolMetadata {
        ToolMetadata {
            name: "get_current_date_time".into(),
            description: "Get the current local date and time. Input: {}.".into(),
            return_direct: false,
        }
    }

    fn call(&self, args: serde_json::Value, _ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let now = Local::now().naive_local();
        Ok(ToolOutput::text(
            "get_current_date_time",
            args,
            format!("The current date and time is {}.", now.format(FORMAT)),
        ))
    }
}

/// Offsets the current time by days, hours and minutes. Negative values
/// move into the past.
pub struct DateTimeFromNowTool;

impl DateTimeFromNowTool {
    fn component(args: &serde_json::Value, key: &str) -> Result<i64, ToolError> {
        match &args[key] {
            serde_json::Value::Null => Ok(0),
            serde_json::Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f.round() as i64))
                .ok_or_else(|| ToolError::InvalidArguments(format!("'{key}' is out of range"))),
            serde_json::Value::String(s) => s
                .trim()
                .parse()
                .map_err(|_| ToolError::InvalidArguments(format!("'{key}' must be an integer"))),
            _ => Err(ToolError::InvalidArguments(format!(
                "'{key}' must be an integer"
            ))),
        }
    }

    fn offset(args: &serde_json::Value) -> Result<Duration, ToolError> {
        let days = Self::component(args, "days")?;
        let hours = Self::component(args, "hours")?;
        let minutes = Self::component(args, "minutes")?;
        Duration::try_days(days)
            .zip(Duration::try_hours(hours))
            .zip(Duration::try_minutes(minutes))
            .and_then(|((d, h), m)| d.checked_add(&h)?.checked_add(&m))
            .ok_or_else(|| ToolError::InvalidArguments("Offset is out of range".into()))
    }

    fn shifted(now: NaiveDateTime, offset: Duration) -> Result<NaiveDateTime, ToolError> {
        now.checked_add_signed(offset)
            .ok_or_else(|| ToolError::InvalidArguments("Resulting date is out of range".into()))
    }
}

#[async_trait]
impl Tool for DateTimeFromNowTool {
    fn metadata(&self) -> ToolMetadata {
        ToolMetadata {
            name: "get_date_time_from_now".into(),
            description: "Get the date and time at an offset from now. \
                          Input: {\"days\": int, \"hours\": int, \"minutes\": int}; \
                          omitted values are 0, negative values go back in time."
                .into(),
            return_direct: false,
        }
    }

    fn call(&self, args: serde_json::Value, _ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let offset = Self::offset(&args)?;
        let then = Self::shifted(Local::now().naive_local(), offset)?;
        Ok(ToolOutput::text(
            "get_date_time_from_now",
            args,
            format!("The requested date and time is {}.", then.format(FORMAT)),
        ))
    }
}
