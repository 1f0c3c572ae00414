use serde_json::{json, Value};
use std::sync::LazyLock;

pub static CONFIG_SCHEMA: LazyLock<Value> = LazyLock::new(|| {
    json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "type": "object",
        "additionalProperties": false,
        "properties": {
            "rules": {
                "type": "object",
                "additionalProperties": false,
                "properties": {
                    "avoid": { "type": "array", "items": { "$ref": "#/$defs/rule" } },
                    "focus": { "type": "array", "items": { "$ref": "#/$defs/rule" } }
                }
            },
            "llm": {
                "type": "object",
                "properties": {
                    "provider": { "$ref": "#/$defs/provider" },
                    "model": { "type": "string" },
                    "api_key": { "type": "string" },
                    "base_url": { "type": "string" },
                    "fallback": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "required": ["provider"],
                            "additionalProperties": false,
                            "properties": {
                                "provider": { "$ref": "#/$defs/provider" },
                                "model": { "type": "string" },
                                "api_key": { "type": "string" },
                                "base_url": { "type": "string" }
                            }
                        }
                    }
                }
            },
            "retry": {
                "type": "object",
                "additionalProperties": false,
                "properties": {
                    "max_attempts": { "type": "integer", "minimum": 1, "maximum": 10 },
                    "base_delay_ms": { "type": "integer", "minimum": 0 },
                    "max_delay_ms": { "type": "integer", "minimum": 0 },
                    "jitter": { "type": "boolean" },
                    "retry_failed_on_resume": { "type": "boolean" }
                }
            },
            "execution": {
                "type": "object",
                "additionalProperties": false,
                "properties": {
                    "agent_timeout_secs": { "type": "integer", "minimum": 1 },
                    "pipeline_testing": { "type": "boolean" },
                    "disable_loader": { "type": "boolean" },
                    "exploits_mutate_tree": { "type": "boolean" },
                    "preflight": { "type": "boolean" }
                }
            },
            "tools": {
                "type": "object",
                "properties": {
                    "enabled": {
                        "type": "array",
                        "items": { "type": "string", "enum": ["nmap", "subfinder", "whatweb"] }
                    }
                }
            },
            "output": {
                "type": "object",
                "properties": {
                    "directory": { "type": "string" }
                }
            }
        },
        "$defs": {
            "provider": { "type": "string", "enum": ["anthropic", "openai", "gemini", "local"] },
            "rule": {
                "type": "object",
                "required": ["description", "type", "url_path"],
                "properties": {
                    "description": { "type": "string" },
                    "type": { "type": "string", "enum": ["path", "subdomain", "domain", "method", "header", "parameter"] },
                    "url_path": { "type": "string" }
                }
            }
        }
    })
});
