//! JSON Schemas for the case pipeline's structured outputs.

use serde_json::json;

use judgeloop_shared::{AnonymizedText, CaseClassification, JudgeVerdict};

use crate::generator::ResponseSchema;

impl ResponseSchema for AnonymizedText {
    const NAME: &'static str = "anonymized_text";

    fn schema() -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "text": {
                    "type": "string",
                    "description": "The input text with all personal data replaced by placeholders"
                }
            },
            "required": ["text"],
            "additionalProperties": false
        })
    }
}

impl ResponseSchema for JudgeVerdict {
    const NAME: &'static str = "judge_verdict";

    fn schema() -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "approved": {
                    "type": "boolean",
                    "description": "True if the candidate output meets every criterion"
                }
            },
            "required": ["approved"],
            "additionalProperties": false
        })
    }
}

impl ResponseSchema for CaseClassification {
    const NAME: &'static str = "case_classification";

    fn schema() -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "status": {"type": "string", "enum": ["done", "pending"]},
                "actions": {"type": "string"},
                "info": {"type": "string"},
                "department": {"type": "string"}
            },
            "required": ["status", "actions", "info", "department"],
            "additionalProperties": false
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_required_field_is_declared() {
        for schema in [
            AnonymizedText::schema(),
            JudgeVerdict::schema(),
            CaseClassification::schema(),
        ] {
            let props = schema["properties"].as_object().unwrap();
            for field in schema["required"].as_array().unwrap() {
                assert!(props.contains_key(field.as_str().unwrap()));
            }
        }
    }

    #[test]
    fn status_enum_matches_case_status() {
        let schema = CaseClassification::schema();
        let values: Vec<CaseClassification> = schema["properties"]["status"]["enum"]
            .as_array()
            .unwrap()
            .iter()
            .map(|s| {
                serde_json::from_value(json!({
                    "status": s, "actions": "", "info": "", "department": ""
                }))
                .unwrap()
            })
            .collect();
        assert_eq!(values.len(), 2);
    }
}
