//! Rule-based grammar pattern detection.
//!
//! A fixed table of JLPT-adjacent grammar points, each with a regex and a
//! weight. Detection counts matches per pattern, scores them, and returns
//! the top hits for a chunk of text.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

/// One detectable grammar point.
pub struct GrammarPattern {
    pub id: &'static str,
    pub name: &'static str,
    pub explanation_zh: &'static str,
    pub pattern: &'static str,
    pub weight: u32,
}

/// Detection table, ordered roughly by curriculum order.
pub const GRAMMAR_PATTERNS: &[GrammarPattern] = &[
    GrammarPattern {
        id: "node",
        name: "ので",
        explanation_zh: "表示原因，语气较客观（因为……）。",
        pattern: "ので",
        weight: 3,
    },
    GrammarPattern {
        id: "noni",
        name: "のに",
        explanation_zh: "表示转折或意外（明明……却……）。",
        pattern: "のに",
        weight: 4,
    },
    GrammarPattern {
        id: "kedo",
        name: "けど/けれど",
        explanation_zh: "转折连接（但是……）。",
        pattern: "けれども|けれど|けど",
        weight: 3,
    },
    GrammarPattern {
        id: "ga-contrast",
        name: "が (逆接)",
        explanation_zh: "句中转折连接（但是……）。",
        pattern: r"が、|が。|が\s",
        weight: 2,
    },
    GrammarPattern {
        id: "temoii",
        name: "てもいい",
        explanation_zh: "表示许可（可以……）。",
        pattern: "てもいい|てもよい",
        weight: 4,
    },
    GrammarPattern {
        id: "tewaikenai",
        name: "てはいけない",
        explanation_zh: "表示禁止（不可以……）。",
        pattern: "てはいけない|てはならない",
        weight: 5,
    },
    GrammarPattern {
        id: "tekudasai",
        name: "てください",
        explanation_zh: "礼貌请求（请……）。",
        pattern: "てください",
        weight: 4,
    },
    GrammarPattern {
        id: "teiru",
        name: "ている",
        explanation_zh: "表示进行或状态持续。",
        pattern: "ている|でいる",
        weight: 3,
    },
    GrammarPattern {
        id: "teshimau",
        name: "てしまう",
        explanation_zh: "表示完成或遗憾（不小心……）。",
        pattern: "てしまう|でしまう|ちゃう|じゃう",
        weight: 4,
    },
    GrammarPattern {
        id: "youda",
        name: "ようだ",
        explanation_zh: "表示比况或推测（好像……）。",
        pattern: "ようだ|ようです",
        weight: 4,
    },
    GrammarPattern {
        id: "rashii",
        name: "らしい",
        explanation_zh: "表示传闻或典型特征（听说/像……）。",
        pattern: "らしい",
        weight: 4,
    },
    GrammarPattern {
        id: "souda",
        name: "そうだ",
        explanation_zh: "表示传闻或样态（听说/看起来……）。",
        pattern: "そうだ",
        weight: 3,
    },
    GrammarPattern {
        id: "nakerebanaranai",
        name: "なければならない",
        explanation_zh: "表示义务（必须……）。",
        pattern: "なければならない|なければいけない|なくてはならない|なくてはいけない",
        weight: 5,
    },
    GrammarPattern {
        id: "nakutemoii",
        name: "なくてもいい",
        explanation_zh: "表示不必要（不……也可以）。",
        pattern: "なくてもいい|なくてもよい",
        weight: 5,
    },
    GrammarPattern {
        id: "kotogaaru",
        name: "ことがある",
        explanation_zh: "表示有时会……或经历。",
        pattern: "ことがある",
        weight: 3,
    },
    GrammarPattern {
        id: "kotoninaru",
        name: "ことになる",
        explanation_zh: "表示结果决定为……。",
        pattern: "ことになる|ことになっている",
        weight: 4,
    },
    GrammarPattern {
        id: "tameni",
        name: "ために",
        explanation_zh: "表示目的或原因（为了……）。",
        pattern: "ために",
        weight: 3,
    },
    GrammarPattern {
        id: "bakari",
        name: "ばかり",
        explanation_zh: "表示大约/净是/刚刚。",
        pattern: "ばかり",
        weight: 3,
    },
    GrammarPattern {
        id: "temiru",
        name: "てみる",
        explanation_zh: "表示尝试做某事。",
        pattern: "てみる|でみる",
        weight: 4,
    },
    GrammarPattern {
        id: "okagede",
        name: "おかげで",
        explanation_zh: "托……的福，多用于好结果。",
        pattern: "おかげで",
        weight: 4,
    },
    GrammarPattern {
        id: "nichigainai",
        name: "に違いない",
        explanation_zh: "表示强推测（一定……）。",
        pattern: "に違いない",
        weight: 5,
    },
    GrammarPattern {
        id: "shikanai",
        name: "しか〜ない",
        explanation_zh: "表示限定（只……）。",
        pattern: r"しか[^。！？\n]{0,20}ない",
        weight: 4,
    },
    GrammarPattern {
        id: "kamoshirenai",
        name: "かもしれない",
        explanation_zh: "表示不确定推测（也许……）。",
        pattern: "かもしれない",
        weight: 4,
    },
];

static COMPILED: Lazy<Vec<Regex>> = Lazy::new(|| {
    GRAMMAR_PATTERNS
        .iter()
        .map(|p| Regex::new(p.pattern).unwrap())
        .collect()
});

/// A pattern that fired on a piece of text.
#[derive(Debug, Clone, Serialize)]
pub struct PatternHit {
    pub id: &'static str,
    pub name: &'static str,
    pub explanation_zh: &'static str,
    pub count: u32,
    pub score: u32,
    /// First matched text, verbatim.
    pub match_text: String,
    /// Char offset of the first match.
    pub start: usize,
}

/// Runs every pattern over `text` and returns the `top_k` hits.
///
/// Score is `weight + min(count, 3)`; ties break by higher count, then by
/// earlier first match.
pub fn detect_grammar_patterns(text: &str, top_k: usize) -> Vec<PatternHit> {
    let mut hits = Vec::new();
    for (pattern, regex) in GRAMMAR_PATTERNS.iter().zip(COMPILED.iter()) {
        let mut count = 0u32;
        let mut first = None;
        for m in regex.find_iter(text) {
            if first.is_none() {
                first = Some(m);
            }
            count += 1;
        }
        let Some(first) = first else { continue };
        hits.push(PatternHit {
            id: pattern.id,
            name: pattern.name,
            explanation_zh: pattern.explanation_zh,
            count,
            score: pattern.weight + count.min(3),
            match_text: first.as_str().to_string(),
            start: text[..first.start()].chars().count(),
        });
    }
    hits.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then(b.count.cmp(&a.count))
            .then(a.start.cmp(&b.start))
    });
    hits.truncate(top_k);
    hits
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "雨が降っているので、出かけない。行ってもいいが、遅れてはいけない。";

    #[test]
    fn ranks_by_score_then_position() {
        let hits = detect_grammar_patterns(SAMPLE, 3);
        let ids: Vec<&str> = hits.iter().map(|h| h.id).collect();
        assert_eq!(ids, ["tewaikenai", "temoii", "teiru"]);
        assert_eq!(hits[0].score, 6);
        assert_eq!(hits[1].score, 5);
        // teiru and node both score 4 with one match each; teiru fires
        // earlier in the text.
        assert_eq!(hits[2].score, 4);
        assert_eq!(hits[2].start, 4);
    }

    #[test]
    fn top_k_widens_the_tail() {
        let hits = detect_grammar_patterns(SAMPLE, 10);
        let ids: Vec<&str> = hits.iter().map(|h| h.id).collect();
        assert!(ids.contains(&"node"));
        assert!(ids.contains(&"ga-contrast"));
        assert_eq!(hits.len(), 5);
    }

    #[test]
    fn contrastive_ga_needs_a_break_after_it() {
        let hits = detect_grammar_patterns("雨が降る。", 10);
        assert!(hits.iter().all(|h| h.id != "ga-contrast"));

        let hits = detect_grammar_patterns("行くが 待つ。", 10);
        let ga = hits.iter().find(|h| h.id == "ga-contrast");
        assert!(ga.is_some());
    }

    #[test]
    fn shika_nai_is_bounded_to_one_clause() {
        let hits = detect_grammar_patterns("切符は一枚しか残っていない。", 10);
        let hit = hits.iter().find(|h| h.id == "shikanai").unwrap();
        assert_eq!(hit.match_text, "しか残っていない");

        // The gap may not cross a sentence boundary.
        let hits = detect_grammar_patterns("しかたがない。問題ない。", 10);
        let hit = hits.iter().find(|h| h.id == "shikanai").unwrap();
        assert_eq!(hit.match_text, "しかたがない");
    }

    #[test]
    fn repeat_bonus_caps_at_three() {
        let text = "春なので、夏なので、秋なので、冬なので、今日なので。";
        let hits = detect_grammar_patterns(text, 1);
        assert_eq!(hits[0].id, "node");
        assert_eq!(hits[0].count, 5);
        assert_eq!(hits[0].score, 3 + 3);
    }

    #[test]
    fn empty_text_yields_nothing() {
        assert!(detect_grammar_patterns("", 5).is_empty());
    }
}
