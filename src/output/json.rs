use anyhow::Result;
use serde::Serialize;

pub fn format_value<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

#[cfg(test)]
mod tests {
    use super::format_value;
    use crate::gmail::SentReply;

    #[test]
    fn sent_reply_renders_as_pretty_json() {
        let rendered = format_value(&SentReply {
            id: "s-1".to_string(),
            thread_id: "t-1".to_string(),
            to: "alex@example.com".to_string(),
            subject: "Re: lunch".to_string(),
        })
        .expect("render");
        let parsed: serde_json::Value = serde_json::from_str(&rendered).expect("valid json");
        assert_eq!(parsed["thread_id"], "t-1");
        assert!(rendered.contains('\n'));
    }
}
