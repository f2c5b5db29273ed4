//! JSON output for the CLI
//!
//! One JSON object per invocation on stdout:
//! - success: `{"status":"ok","data":..,"messages":[..]}`
//! - failure: `{"status":"error","code":..,"category":..,"message":..,"messages":[..]}`

use std::io::{self, Write};

use serde_json::{json, Value};

use super::errors::CliResult;
use crate::context::Message;
use crate::errors::AdminError;

/// Envelope for a successful command.
pub fn ok_response(data: Value, messages: &[Message]) -> Value {
    json!({
        "status": "ok",
        "data": data,
        "messages": messages,
    })
}

/// Envelope for a failed operation, including what it reported before failing.
pub fn error_response(error: &AdminError, messages: &[Message]) -> Value {
    let mut response = json!({
        "status": "error",
        "code": format!("{:?}", error.kind),
        "category": error.category().as_str(),
        "message": error.message,
        "messages": messages,
    });
    if let Some(ref cause) = error.cause {
        response["cause"] = json!({
            "code": cause.code,
            "message": cause.to_string(),
        });
    }
    response
}

/// Envelope for a CLI-level failure.
pub fn cli_error_response(code: &str, message: &str) -> Value {
    json!({
        "status": "error",
        "code": code,
        "message": message,
    })
}

/// Write one response line to stdout
pub fn write_json(response: &Value) -> CliResult<()> {
    let mut stdout = io::stdout();
    serde_json::to_writer(&mut stdout, response)?;
    writeln!(stdout)?;
    stdout.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::MessageLevel;
    use crate::errors::AdminErrorKind;

    #[test]
    fn test_ok_response_shape() {
        let messages = vec![Message {
            level: MessageLevel::Warning,
            text: "Instance is lagging".to_string(),
        }];
        let response = ok_response(json!({"clusterName": "prod"}), &messages);
        assert_eq!(response["status"], "ok");
        assert_eq!(response["data"]["clusterName"], "prod");
        assert_eq!(response["messages"][0]["level"], "WARNING");
    }

    #[test]
    fn test_error_response_names_kind_and_category() {
        let error = AdminError::precondition(AdminErrorKind::NoQuorum, "no quorum");
        let response = error_response(&error, &[]);
        assert_eq!(response["status"], "error");
        assert_eq!(response["code"], "NoQuorum");
        assert_eq!(response["category"], "PreconditionError");
        assert!(response.get("cause").is_none());
    }
}
