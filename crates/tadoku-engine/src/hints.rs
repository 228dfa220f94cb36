//! Built-in Chinese glosses for common words, used by the local analysis
//! path when no model output is available.

use std::collections::HashMap;

use once_cell::sync::Lazy;

const HINTS: &[(&str, &str)] = &[
    ("学校", "学校"),
    ("先生", "老师"),
    ("生徒", "学生"),
    ("時間", "时间"),
    ("今日", "今天"),
    ("明日", "明天"),
    ("昨日", "昨天"),
    ("天気", "天气"),
    ("雨", "雨"),
    ("雪", "雪"),
    ("風", "风"),
    ("空", "天空"),
    ("海", "大海"),
    ("山", "山"),
    ("川", "河"),
    ("花", "花"),
    ("桜", "樱花"),
    ("犬", "狗"),
    ("猫", "猫"),
    ("鳥", "鸟"),
    ("魚", "鱼"),
    ("食べる", "吃"),
    ("飲む", "喝"),
    ("読む", "读"),
    ("書く", "写"),
    ("話す", "说话"),
    ("聞く", "听；问"),
    ("見る", "看"),
    ("帰る", "回去"),
    ("買う", "买"),
    ("売る", "卖"),
    ("作る", "制作"),
    ("使う", "使用"),
    ("知る", "知道"),
    ("分かる", "明白"),
    ("歩く", "走路"),
    ("走る", "跑"),
    ("待つ", "等待"),
    ("好き", "喜欢"),
    ("嫌い", "讨厌"),
    ("大きい", "大"),
    ("小さい", "小"),
    ("新しい", "新"),
    ("古い", "旧"),
    ("高い", "高；贵"),
    ("安い", "便宜"),
    ("速い", "快"),
    ("遅い", "慢；晚"),
    ("楽しい", "开心"),
    ("嬉しい", "高兴"),
    ("悲しい", "悲伤"),
    ("美しい", "美丽"),
    ("家", "家"),
    ("部屋", "房间"),
    ("電車", "电车"),
    ("駅", "车站"),
    ("道", "道路"),
    ("町", "城镇"),
    ("村", "村庄"),
    ("世界", "世界"),
    ("言葉", "语言；词语"),
    ("物語", "故事"),
    ("手紙", "信"),
    ("友達", "朋友"),
    ("家族", "家人"),
    ("子供", "孩子"),
    ("大人", "大人"),
    ("人間", "人类"),
    ("心", "心"),
    ("声", "嗓音"),
    ("音", "声音"),
    ("光", "光"),
    ("影", "影子"),
    ("夜", "夜晚"),
    ("朝", "早晨"),
    ("昼", "中午"),
    ("春", "春天"),
    ("夏", "夏天"),
    ("秋", "秋天"),
    ("冬", "冬天"),
];

static HINT_MAP: Lazy<HashMap<&'static str, &'static str>> =
    Lazy::new(|| HINTS.iter().copied().collect());

/// Gloss for `base`, or empty when the word has no built-in entry.
pub fn hint_for(base: &str) -> &'static str {
    HINT_MAP.get(base).copied().unwrap_or("")
}
