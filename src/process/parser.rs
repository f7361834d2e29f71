//! Action 解析：从模型回复中提取 <thought> / <tool_name> / <tool_args>
//!
//! tool_name 必需，缺失即 MissingToolName；thought 与 tool_args 可选。
//! tool_args 内为扁平的 <key>value</key> 对，值按 布尔 → null → 整数 → 浮点 → 字面量结构 → 文本 的顺序推断类型。
//! 外层包裹标签（如 <action>）是否存在不影响解析。

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Number, Value};
use thiserror::Error;

/// 工具参数（扁平键值）
pub type ToolArgs = Map<String, Value>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("No <tool_name> found")]
    MissingToolName,
}

/// 模型的一次决策
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub thought: Option<String>,
    pub tool_name: String,
    pub tool_args: ToolArgs,
}

fn thought_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<thought>(.*?)</thought>").expect("valid regex"))
}

fn tool_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<tool_name>\s*(.*?)\s*</tool_name>").expect("valid regex"))
}

fn tool_args_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<tool_args>\s*(.*?)\s*</tool_args>").expect("valid regex"))
}

fn open_tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<(\w+)>").expect("valid regex"))
}

/// 解析模型回复
pub fn parse(content: &str) -> Result<Decision, ParseError> {
    let thought = thought_re()
        .captures(content)
        .map(|c| c[1].trim().to_string());

    let tool_name = tool_name_re()
        .captures(content)
        .map(|c| c[1].trim().to_string())
        .ok_or_else(|| {
            tracing::debug!(content = %content, "model reply without <tool_name>");
            ParseError::MissingToolName
        })?;

    let tool_args = tool_args_re()
        .captures(content)
        .map(|c| parse_args(c.get(1).map_or("", |m| m.as_str())))
        .unwrap_or_default();

    Ok(Decision {
        thought,
        tool_name,
        tool_args,
    })
}

/// 逐个提取 <key>value</key>；regex 不支持反向引用，闭合标签手动查找
fn parse_args(block: &str) -> ToolArgs {
    let mut args = ToolArgs::new();
    let mut pos = 0;
    while let Some(cap) = open_tag_re().captures_at(block, pos) {
        let (Some(open), Some(key)) = (cap.get(0), cap.get(1)) else {
            break;
        };
        let close = format!("</{}>", key.as_str());
        match block[open.end()..].find(&close) {
            Some(rel) => {
                let raw = &block[open.end()..open.end() + rel];
                args.insert(key.as_str().to_string(), infer_value(raw.trim()));
                pos = open.end() + rel + close.len();
            }
            None => pos = open.end(),
        }
    }
    args
}

/// 类型推断：布尔 → null → 整数 → 浮点 → 字面量结构 → 文本
pub fn infer_value(raw: &str) -> Value {
    let lower = raw.to_lowercase();
    match lower.as_str() {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        "null" | "none" => return Value::Null,
        _ => {}
    }
    if let Ok(i) = raw.parse::<i64>() {
        return Value::Number(i.into());
    }
    if let Ok(u) = raw.parse::<u64>() {
        return Value::Number(u.into());
    }
    if let Some(n) = raw.parse::<f64>().ok().and_then(Number::from_f64) {
        return Value::Number(n);
    }
    if let Some(v) = parse_literal(raw) {
        return v;
    }
    Value::String(raw.to_string())
}

/// 字面量结构：JSON 数组 / 对象 / 双引号字符串，或单引号风格的同类写法
fn parse_literal(raw: &str) -> Option<Value> {
    let first = raw.chars().next()?;
    let last = raw.chars().last()?;
    match (first, last) {
        ('[', ']') | ('{', '}') => serde_json::from_str(raw)
            .ok()
            .or_else(|| serde_json::from_str(&normalize_python_literal(raw)).ok()),
        ('"', '"') if raw.len() >= 2 => serde_json::from_str(raw).ok(),
        ('\'', '\'') if raw.len() >= 2 => Some(Value::String(raw[1..raw.len() - 1].to_string())),
        _ => None,
    }
}

/// 'a' → "a"，True/False/None → true/false/null（仅替换引号外的词）
fn normalize_python_literal(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut in_string = false;
    let mut word = String::new();
    let flush = |word: &mut String, out: &mut String| {
        match word.as_str() {
            "True" => out.push_str("true"),
            "False" => out.push_str("false"),
            "None" => out.push_str("null"),
            w => out.push_str(w),
        }
        word.clear();
    };
    for ch in raw.chars() {
        if in_string {
            match ch {
                '\'' => {
                    in_string = false;
                    out.push('"');
                }
                '"' => out.push_str("\\\""),
                c => out.push(c),
            }
        } else if ch.is_alphanumeric() || ch == '_' {
            word.push(ch);
        } else {
            flush(&mut word, &mut out);
            if ch == '\'' {
                in_string = true;
                out.push('"');
            } else {
                out.push(ch);
            }
        }
    }
    flush(&mut word, &mut out);
    out
}

/// 把一次工具调用还原成模型使用的标签格式（写入 assistant 记录）
pub fn format_tool_call(tool_name: &str, args: &ToolArgs) -> String {
    let args = args
        .iter()
        .map(|(k, v)| format!("<{k}>{}</{k}>", value_text(v)))
        .collect::<Vec<_>>()
        .join(" ");
    format!("<tool_name>{tool_name}</tool_name><tool_args>{args}</tool_args>")
}

/// 参数值的文本形式：字符串原样，其余用 JSON
pub fn value_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_full_reply() {
        let reply = r#"
        <thought>Thinking about it</thought>
        <tool_name>TestTool</tool_name>
        <tool_args>
            <arg1>value1</arg1>
            <arg2>123</arg2>
            <arg3>true</arg3>
        </tool_args>
        "#;
        let d = parse(reply).unwrap();
        assert_eq!(d.thought.as_deref(), Some("Thinking about it"));
        assert_eq!(d.tool_name, "TestTool");
        assert_eq!(Value::Object(d.tool_args), json!({"arg1": "value1", "arg2": 123, "arg3": true}));
    }

    #[test]
    fn test_parse_typed_args() {
        let d = parse("<tool_name>X</tool_name><tool_args><n>3</n><flag>true</flag></tool_args>").unwrap();
        assert_eq!(d.tool_args["n"], json!(3));
        assert!(d.tool_args["n"].is_i64());
        assert_eq!(d.tool_args["flag"], json!(true));
    }

    #[test]
    fn test_missing_thought_and_args() {
        let d = parse("<tool_name>ThinkTool</tool_name>").unwrap();
        assert_eq!(d.thought, None);
        assert!(d.tool_args.is_empty());

        let d = parse("<tool_name>T</tool_name><tool_args>  </tool_args>").unwrap();
        assert!(d.tool_args.is_empty());
    }

    #[test]
    fn test_missing_tool_name() {
        assert_eq!(parse("Just some text"), Err(ParseError::MissingToolName));
        assert_eq!(ParseError::MissingToolName.to_string(), "No <tool_name> found");
    }

    #[test]
    fn test_wrapper_tag_optional() {
        let wrapped = "<action><tool_name>Stop Tool</tool_name><tool_args><success>ok</success></tool_args></action>";
        let bare = "<tool_name>Stop Tool</tool_name><tool_args><success>ok</success></tool_args>";
        assert_eq!(parse(wrapped).unwrap(), parse(bare).unwrap());
    }

    #[test]
    fn test_infer_value_order() {
        assert_eq!(infer_value("FALSE"), json!(false));
        assert_eq!(infer_value("None"), Value::Null);
        assert_eq!(infer_value("-7"), json!(-7));
        assert_eq!(infer_value("2.5"), json!(2.5));
        assert_eq!(infer_value("[1, 2]"), json!([1, 2]));
        assert_eq!(infer_value("{'a': True, 'b': None}"), json!({"a": true, "b": null}));
        assert_eq!(infer_value("'quoted'"), json!("quoted"));
        assert_eq!(infer_value("\"hi\""), json!("hi"));
        assert_eq!(infer_value("weather in Paris"), json!("weather in Paris"));
        assert_eq!(infer_value("[not json"), json!("[not json"));
    }

    #[test]
    fn test_multiline_value_trimmed() {
        let d = parse("<tool_name>T</tool_name><tool_args><text>\n  line one\n  line two\n</text></tool_args>").unwrap();
        assert_eq!(d.tool_args["text"], json!("line one\n  line two"));
    }

    #[test]
    fn test_format_tool_call_parses_back() {
        let mut args = ToolArgs::new();
        args.insert("id".into(), json!("thread-1"));
        args.insert("n".into(), json!(3));
        let text = format_tool_call("Switch Tool", &args);
        let d = parse(&text).unwrap();
        assert_eq!(d.tool_name, "Switch Tool");
        assert_eq!(d.tool_args, args);
    }
}
