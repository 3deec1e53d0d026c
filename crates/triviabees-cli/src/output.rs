//! JSON output on `stdout`.

use std::io::Write;

use anyhow::Result;
use serde::Serialize;
use serde_json::{Value, json};

use triviabees_service::coordinator::GenerationResult;

/// Writes `value` as a single line of JSON.
pub fn write_json(writer: &mut impl Write, value: &impl Serialize) -> Result<()> {
    serde_json::to_writer(&mut *writer, value)?;
    writeln!(writer)?;
    Ok(())
}

pub fn print_json(value: &impl Serialize) -> Result<()> {
    write_json(&mut std::io::stdout().lock(), value)
}

/// The output line of one request in a batch.
pub fn result_line(result: &GenerationResult) -> Value {
    match result {
        Ok(value) => json!({ "result": value }),
        Err(error) => json!({ "error": error.to_string() }),
    }
}

#[cfg(test)]
mod tests {
    use triviabees_service::coordinator::GenerationError;

    use super::*;

    #[test]
    fn test_result_line() {
        let ok = Ok(json!({"imageUrl": "https://cdn.example.com/bee.png"}));
        assert_eq!(
            result_line(&ok),
            json!({"result": {"imageUrl": "https://cdn.example.com/bee.png"}})
        );

        let failed = Err(GenerationError::Failed {
            attempts: 3,
            message: "model overloaded".into(),
        });
        assert_eq!(
            result_line(&failed),
            json!({"error": "generation failed after 3 attempts: model overloaded"})
        );
    }

    #[test]
    fn test_write_json() {
        let mut buf = Vec::new();
        write_json(&mut buf, &json!({"a": 1})).unwrap();
        write_json(&mut buf, &json!([true])).unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), "{\"a\":1}\n[true]\n");
    }
}
