use serde_json::{json, Value};

use super::{display_value, is_truthy, EventRequestError};

const SYSTEM_PROMPT: &str = "你是一个中世纪佛罗伦萨的游戏事件生成器。";

/// Keys a generated outcome must carry.
pub const REQUIRED_KEYS: [&str; 2] = ["message", "effects"];

/// Player's answer to a random event, submitted with `/event-choice`.
#[derive(Debug, Clone, PartialEq)]
pub struct EventChoiceRequest {
    pub accepted: bool,
    pub current_money: Value,
    pub current_reputation: Value,
}

impl EventChoiceRequest {
    /// `accepted` is required and read with JSON truthiness. Current stats
    /// default to `0`.
    pub fn from_json(body: &Value) -> Result<Self, EventRequestError> {
        let map = body.as_object().ok_or(EventRequestError::NoData)?;
        if map.is_empty() {
            return Err(EventRequestError::NoData);
        }
        let accepted = map
            .get("accepted")
            .ok_or(EventRequestError::MissingField("accepted"))?;
        Ok(Self {
            accepted: is_truthy(accepted),
            current_money: map.get("currentMoney").cloned().unwrap_or(json!(0)),
            current_reputation: map.get("currentReputation").cloned().unwrap_or(json!(0)),
        })
    }

    pub fn system_prompt(&self) -> &'static str {
        SYSTEM_PROMPT
    }

    pub fn user_prompt(&self) -> String {
        let verb = if self.accepted { "接受" } else { "拒绝" };
        format!(
            "玩家{verb}了随机事件。
当前金钱：{money}
当前声望：{reputation}

请生成一个有趣的结果描述，包含：
1. 结果描述文本（简短、生动）
2. 对金钱和声望的影响

以JSON格式返回，例如：
{{
    \"message\": \"结果描述\",
    \"effects\": {{
        \"money\": 50,
        \"reputation\": 10
    }}
}}",
            money = display_value(&self.current_money),
            reputation = display_value(&self.current_reputation),
        )
    }

    /// Outcome used when the model's reply cannot be used.
    pub fn fallback(&self) -> Value {
        let (money, reputation) = if self.accepted { (10, 5) } else { (0, 0) };
        json!({
            "message": "你的选择产生了一些影响...",
            "effects": {"money": money, "reputation": reputation}
        })
    }
}
