//! 线程私有对话：角色标记的消息
//!
//! 每个线程持有自己的 Vec<Message>，线程之间不共享历史，仅通过 Stop 的结果传递信息。
//! 带图片的观察（远程工具返回 image 块）用 images 字段区分，LLM 客户端会将其转为多模态内容。

use serde::{Deserialize, Serialize};

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// 单条消息；images 非空时为带图观察（base64 数据）
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
    #[serde(default = "default_mime_type", skip_serializing_if = "is_default_mime")]
    pub mime_type: String,
}

fn default_mime_type() -> String {
    "image/png".to_string()
}

fn is_default_mime(mime: &str) -> bool {
    mime == "image/png"
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            images: Vec::new(),
            mime_type: default_mime_type(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            images: Vec::new(),
            mime_type: default_mime_type(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            images: Vec::new(),
            mime_type: default_mime_type(),
        }
    }

    /// 带图观察：以 user 角色发送，文本与图片一起交给模型
    pub fn image(content: impl Into<String>, images: Vec<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            images,
            mime_type: default_mime_type(),
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = mime_type.into();
        self
    }

    pub fn has_images(&self) -> bool {
        !self.images.is_empty()
    }

    /// 图片的 data URL 形式（data:image/png;base64,...）
    pub fn image_data_urls(&self) -> Vec<String> {
        self.images
            .iter()
            .map(|data| {
                if data.starts_with("data:") {
                    data.clone()
                } else {
                    format!("data:{};base64,{}", self.mime_type, data)
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_message_is_user_role() {
        let msg = Message::image("<tool_result>screenshot</tool_result>", vec!["AAAA".into()]);
        assert_eq!(msg.role, Role::User);
        assert!(msg.has_images());
        assert_eq!(msg.image_data_urls(), vec!["data:image/png;base64,AAAA".to_string()]);
    }

    #[test]
    fn test_data_url_passthrough() {
        let msg = Message::image("x", vec!["data:image/jpeg;base64,BBBB".into()])
            .with_mime_type("image/jpeg");
        assert_eq!(msg.image_data_urls()[0], "data:image/jpeg;base64,BBBB");
    }

    #[test]
    fn test_plain_message_serializes_without_images() {
        let json = serde_json::to_value(Message::assistant("hi")).unwrap();
        assert_eq!(json["role"], "assistant");
        assert!(json.get("images").is_none());
    }
}
