//! 通道命名
//!
//! 所有派生都是纯函数，同一输入在任何worker上得到同一通道名。

const RETRY_SEPARATOR: &str = "-retry-";
const DEAD_LETTER_SUFFIX: &str = "-dlt";

/// 第 `attempt` 次重试所在的通道，`attempt` 从1开始
pub fn retry_lane(topic: &str, attempt: u32) -> String {
    format!("{topic}{RETRY_SEPARATOR}{attempt}")
}

/// 主题的死信通道
pub fn dead_letter_lane(topic: &str) -> String {
    format!("{topic}{DEAD_LETTER_SUFFIX}")
}

/// 是否为死信通道
pub fn is_dead_letter_lane(lane: &str) -> bool {
    lane.ends_with(DEAD_LETTER_SUFFIX)
}

/// 一个监听器需要绑定的全部通道：基础通道加上每个重试层级
pub fn listener_lanes(topic: &str, max_attempts: u32) -> Vec<String> {
    std::iter::once(topic.to_string())
        .chain((1..max_attempts).map(|attempt| retry_lane(topic, attempt)))
        .collect()
}

/// 从重试通道名解析重试层级，基础通道返回0
pub fn retry_tier(topic: &str, lane: &str) -> Option<u32> {
    if lane == topic {
        return Some(0);
    }
    lane.strip_prefix(topic)?
        .strip_prefix(RETRY_SEPARATOR)?
        .parse()
        .ok()
}
