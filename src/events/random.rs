use serde_json::{json, Value};

use super::{display_value, EventRequestError};

const SYSTEM_PROMPT: &str =
    "你是一个JSON格式的随机事件生成器，必须严格按照指定格式输出，不要添加任何其他内容。";

/// Keys a generated event must carry to be shown to the player.
pub const REQUIRED_KEYS: [&str; 3] = ["type", "title", "description"];

/// Game state submitted with `/random-event`.
///
/// Values are kept as raw JSON and rendered into the prompt as-is.
#[derive(Debug, Clone, PartialEq)]
pub struct RandomEventRequest {
    pub money: Value,
    pub reputation: Value,
    pub player_action: Value,
    pub context: Value,
}

impl RandomEventRequest {
    pub fn from_json(body: &Value) -> Result<Self, EventRequestError> {
        let map = body.as_object().ok_or(EventRequestError::NoData)?;
        if map.is_empty() {
            return Err(EventRequestError::NoData);
        }
        let field = |name: &'static str| {
            map.get(name)
                .cloned()
                .ok_or(EventRequestError::MissingField(name))
        };
        Ok(Self {
            money: field("money")?,
            reputation: field("reputation")?,
            player_action: field("playerAction")?,
            context: field("context")?,
        })
    }

    pub fn system_prompt(&self) -> &'static str {
        SYSTEM_PROMPT
    }

    pub fn user_prompt(&self) -> String {
        format!(
            "根据当前状态生成一个随机事件：
当前金钱：{money}
当前声望：{reputation}
玩家行为：{action}
上下文：{context}

请生成一个有趣的随机事件，必须包含：
1. 事件标题（简短）
2. 事件描述（具体的情况说明，100字以内）

以JSON格式返回：
{{
    \"type\": \"random_event\",
    \"title\": \"事件标题\",
    \"description\": \"详细的事件描述\"
}}

注意：
1. 事件要与当前状态和玩家行为相关
2. 描述要具体且有趣
3. 不要包含预设的选项，让玩家自由决定如何应对",
            money = display_value(&self.money),
            reputation = display_value(&self.reputation),
            action = display_value(&self.player_action),
            context = display_value(&self.context),
        )
    }
}

/// Event shown when the model's reply cannot be used.
pub fn fallback_event() -> Value {
    json!({
        "type": "random_event",
        "title": "意外发现",
        "description": "你在街上发现了一些有趣的东西...",
        "choices": [
            {
                "text": "仔细查看",
                "effects": {"money": 20, "reputation": 5}
            }
        ]
    })
}
