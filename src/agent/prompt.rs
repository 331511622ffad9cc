//! System prompt composition for the game master.
//!
//! The prompt is rebuilt from session state on every turn and is never stored
//! in the session history. Game text stays in Chinese: the browser client
//! parses `金钱：N` / `声望：N` out of model replies.

use std::fmt::Write;

use crate::sessions::Session;

/// Opening narrative sent for a fresh session instead of calling the model.
pub const WELCOME_MESSAGE: &str = "欢迎来到15世纪的佛罗伦萨！ 👋
你站在熙熙攘攘的街头，周围是古老的建筑和忙碌的商贩。你是一个初来乍到的冒险者，需要在这里建立自己的声望和财富。

💰金钱：100，⭐声望：0

你可以：
1. 成为一名商人，经营店铺，努力成为富甲一方的豪绅
2. 当一名雇佣兵，提供护卫服务，争取成为光荣的骑士
3. 加入地下帮派，赚取黑金，以反抗贵族
4. 成为一名寻宝者，探索充满宝藏的危机之境
5. 或者...告诉我你想以什么角色开始游戏？";

const WORLD_SETTING: &str = "你是一个中世纪佛罗伦萨的游戏管理员。游戏背景设定在15世纪的佛罗伦萨，这里不仅有骑士团与刺客的斗争、地下帮派与贵族的对抗，还有吸血鬼、怪兽等神秘事件。";

const NARRATIVE_RULES: [&str; 11] = [
    "根据玩家的选择和行动生成有趣的事件和结果",
    "每次回复都要提供2-3个可能的选择自动换行显示给玩家",
    "回复要简短有趣，富有中世纪佛罗伦萨特色",
    "通过 [系统] 特殊标记来显示金钱和声望的变化",
    "记住玩家的身份和之前的选择，保持剧情连贯性",
    "适时制造一些随机事件来增加游戏的不确定性",
    "每条信息都显示金钱与声望值，但只显示一次，避免出现重复显示（例如：💰金钱：1000，⭐️声望：100）",
    "根据上下文实时变化金钱与声望值",
    "将用户的输入与金钱与声望值进行结合，合理的生成事件（例如：玩家选择购买材料，则金钱减少。玩家打算招兵买马，因声望值过低，则无法成功）",
    "根据用户的游玩程度逐渐解锁更多的探索内容，逐步铺开游戏庞大的世界观，避免一开始就让玩家\"出入自如\"。（例如：玩家一开始无法直接拜访贵族，需要通过做生意或与击败坏人获取金钱或声望，才能拜访贵族，并解锁更庞大的世界关系）",
    "游戏中会出现吸血鬼、怪兽、骑士团、刺客、地下帮派、贵族、寻宝探险等元素，并且会出现叛变、圈套、诡计、阴谋等事件，玩家需要根据情况做出选择，并承担后果。",
];

const LENGTH_NOTE: &str = "注意：保持回复简短，每次回复控制在100字以内。（并适当添加emoji表情）";

/// Render the game-master instruction for `session`.
///
/// Pure: the same session state always yields the same text.
pub fn compose_system_prompt(session: &Session) -> String {
    let status = &session.player_status;
    let mut prompt = String::with_capacity(2048);

    prompt.push_str(WORLD_SETTING);
    prompt.push_str("\n\n当前游戏状态：\n");
    prompt.push_str(&session.summary);
    prompt.push_str("\n\n");

    // Writing into a String cannot fail.
    let _ = writeln!(prompt, "玩家角色：{}", status.role);
    let _ = writeln!(prompt, "重要决策：{}", status.major_decisions.join(", "));
    let _ = writeln!(prompt, "拥有资产：{}", status.assets.join(", "));
    let _ = writeln!(prompt, "NPC关系：{}", status.relationships.join(", "));

    prompt.push_str("\n你需要：\n");
    for (index, rule) in NARRATIVE_RULES.iter().enumerate() {
        let _ = writeln!(prompt, "{}. {rule}", index + 1);
    }

    prompt.push('\n');
    prompt.push_str(LENGTH_NOTE);
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sessions::Turn;

    fn seasoned_session() -> Session {
        let mut session = Session::default();
        session.summary = "玩家在市场里开了一家布店".into();
        session.player_status.role = "商人".into();
        session.player_status.major_decisions = vec!["拒绝了帮派".into(), "救了修士".into()];
        session.player_status.assets = vec!["布店".into()];
        session.player_status.relationships = vec!["美第奇家族：友好".into()];
        session
    }

    #[test]
    fn compose_is_deterministic() {
        let session = seasoned_session();
        assert_eq!(compose_system_prompt(&session), compose_system_prompt(&session));
    }

    #[test]
    fn compose_interpolates_status() {
        let prompt = compose_system_prompt(&seasoned_session());
        assert!(prompt.contains("玩家在市场里开了一家布店"));
        assert!(prompt.contains("玩家角色：商人"));
        assert!(prompt.contains("重要决策：拒绝了帮派, 救了修士"));
        assert!(prompt.contains("拥有资产：布店"));
        assert!(prompt.contains("NPC关系：美第奇家族：友好"));
    }

    #[test]
    fn compose_renders_numbered_rules() {
        let prompt = compose_system_prompt(&Session::default());
        assert!(prompt.starts_with(WORLD_SETTING));
        assert!(prompt.contains("1. 根据玩家的选择"));
        assert!(prompt.contains("2. 每次回复都要提供2-3个可能的选择"));
        assert!(prompt.contains("4. 通过 [系统] 特殊标记"));
        assert!(prompt.contains("11. 游戏中会出现吸血鬼"));
        assert!(prompt.ends_with(LENGTH_NOTE));
    }

    #[test]
    fn compose_ignores_message_history() {
        let mut session = seasoned_session();
        let before = compose_system_prompt(&session);
        session.messages.push(Turn::user("去码头"));
        session.messages.push(Turn::assistant("你来到了码头"));
        assert_eq!(compose_system_prompt(&session), before);
    }

    #[test]
    fn welcome_shows_starting_stats_and_roles() {
        assert!(WELCOME_MESSAGE.contains("💰金钱：100，⭐声望：0"));
        assert!(WELCOME_MESSAGE.contains("1. 成为一名商人"));
        assert!(WELCOME_MESSAGE.contains("告诉我你想以什么角色开始游戏"));
    }
}
