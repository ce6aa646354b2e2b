// SPDX-FileCopyrightText: 2026 Corvid Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `get_current_time`: the current date and time in an IANA timezone.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use corvid_core::CorvidError;

use crate::tool::{Tool, ToolOutput};

pub struct CurrentTime {
    default_timezone: Tz,
}

impl CurrentTime {
    pub fn new(default_timezone: Tz) -> Self {
        Self { default_timezone }
    }
}

/// Formats `now` in `tz`, e.g. "Friday, October 16, 2026 at 3:04:05 PM -03".
fn render(now: DateTime<Utc>, tz: Tz) -> String {
    now.with_timezone(&tz)
        .format("%A, %B %-d, %Y at %-I:%M:%S %p %Z")
        .to_string()
}

#[async_trait]
impl Tool for CurrentTime {
    fn name(&self) -> &str {
        super::GET_CURRENT_TIME
    }

    fn description(&self) -> &str {
        "Get the current date and time"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "timezone": {
                    "type": "string",
                    "description": "IANA timezone (e.g. America/Sao_Paulo). Defaults to the configured timezone."
                }
            },
            "required": []
        })
    }

    async fn invoke(&self, input: serde_json::Value) -> Result<ToolOutput, CorvidError> {
        let tz = match input["timezone"].as_str().filter(|s| !s.trim().is_empty()) {
            None => self.default_timezone,
            Some(name) => match name.trim().parse::<Tz>() {
                Ok(tz) => tz,
                Err(_) => return Ok(ToolOutput::error(format!("Unknown timezone: {name}"))),
            },
        };
        Ok(ToolOutput::text(render(Utc::now(), tz)))
    }
}
