//! LLM 输出清洗
//!
//! 位于「模型原始输出」与「送入校验的候选内容」之间的纯文本变换：
//! 去除 <think> 思考块、Markdown 代码围栏与残留反引号。独立成模块以便脱离网络单测。

use regex::Regex;

/// 清洗 LLM 回复：剥离思考块与代码围栏，返回裸内容
pub fn sanitize_llm_response(response: &str) -> String {
    // <think>...</think> 块（部分推理模型会输出）
    let think = Regex::new(r"(?is)<think>.*?</think>").expect("static regex");
    let mut out = think.replace_all(response, "").trim().to_string();

    // Markdown 代码围栏：```lang\n ... \n```
    if out.starts_with("```") {
        let lines: Vec<&str> = out.lines().collect();
        if lines.len() > 2 {
            let last = lines.len() - 1;
            let end = if lines[last].trim_start().starts_with("```") {
                last
            } else {
                lines.len()
            };
            out = lines[1..end].join("\n");
        }
    }

    // 残留的结尾反引号
    while out.trim_end().ends_with("```") {
        let trimmed = out.trim_end();
        out = trimmed[..trimmed.len() - 3].to_string();
    }

    out.trim().to_string()
}
