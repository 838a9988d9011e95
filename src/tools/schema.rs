//! 工具参数 Schema 与面向模型的工具目录条目
//!
//! 参数可手写，也可由带 JsonSchema 的参数类型通过 schemars 自动生成。

use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 参数 schema：type / properties / required
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolParameters {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
    #[serde(default)]
    pub required: Vec<String>,
}

impl ToolParameters {
    /// 无参数
    pub fn empty() -> Self {
        Self {
            kind: "object".to_string(),
            properties: Map::new(),
            required: Vec::new(),
        }
    }

    /// 追加一个属性；required 为 true 时同时加入必填列表
    pub fn property(mut self, name: &str, schema: Value, required: bool) -> Self {
        self.properties.insert(name.to_string(), schema);
        if required {
            self.required.push(name.to_string());
        }
        self
    }

    /// 由参数类型生成 schema（取根对象的 properties 与 required）
    pub fn from_type<T: JsonSchema>() -> Self {
        let root = serde_json::to_value(schema_for!(T)).unwrap_or(Value::Null);
        let properties = root
            .get("properties")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        let required = root
            .get("required")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        Self {
            kind: "object".to_string(),
            properties,
            required,
        }
    }
}

impl Default for ToolParameters {
    fn default() -> Self {
        Self::empty()
    }
}

/// 工具目录条目（交给模型作为 function-calling schema）；不包含 handler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: ToolParameters,
}
