//! 启发式代码检查器
//!
//! 不依赖外部工具链的轻量静态检查：括号配对（感知字符串与注释）、Python 块头与缩进、
//! import 语句形态。覆盖面有限，但满足「生成代码先过一道语法闸门」的需求。

use crate::validation::{ContentKind, Issue, ValidationResult, Validator};

/// 默认校验器实现
#[derive(Debug, Default)]
pub struct CodeValidator;

impl CodeValidator {
    pub fn new() -> Self {
        Self
    }
}

impl Validator for CodeValidator {
    fn validate(&self, content: &str, kind: ContentKind) -> ValidationResult {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        let mut suggestions = Vec::new();

        if content.trim().is_empty() {
            errors.push(Issue::syntax(None, "content is empty"));
            return ValidationResult {
                valid: false,
                errors,
                warnings,
                suggestions,
            };
        }

        check_delimiters(content, kind, &mut errors);

        match kind {
            ContentKind::Python => {
                check_python_blocks(content, &mut errors);
                check_python_imports(content, &mut errors, &mut warnings);
            }
            ContentKind::Rust => {
                check_rust_use_lines(content, &mut errors);
            }
            ContentKind::Javascript | ContentKind::Unknown => {}
        }

        for (idx, line) in content.lines().enumerate() {
            if line.len() > 200 {
                warnings.push(Issue::style(Some(idx + 1), "line exceeds 200 characters"));
            }
        }

        if !errors.is_empty() {
            suggestions.push("regenerate the content and fix the reported locations".to_string());
        }

        ValidationResult {
            valid: errors.is_empty(),
            errors,
            warnings,
            suggestions,
        }
    }
}

#[derive(Clone, Copy, PartialEq)]
enum ScanState {
    Normal,
    LineComment,
    BlockComment,
    /// 字符串内：记录定界符与是否三引号（Python docstring）
    Str(char, bool),
}

/// 括号配对检查：跳过字符串与注释内的内容，逐字符维护配对栈
fn check_delimiters(content: &str, kind: ContentKind, errors: &mut Vec<Issue>) {
    let line_comment = match kind {
        ContentKind::Python => Some('#'),
        _ => None,
    };
    let slash_comments = matches!(
        kind,
        ContentKind::Rust | ContentKind::Javascript | ContentKind::Unknown
    );

    let mut stack: Vec<(char, usize)> = Vec::new();
    let mut state = ScanState::Normal;
    let mut str_opened_at = 0usize;
    let mut line = 1usize;
    let chars: Vec<char> = content.chars().collect();
    let mut i = 0usize;

    while i < chars.len() {
        let c = chars[i];
        if c == '\n' {
            line += 1;
            if state == ScanState::LineComment {
                state = ScanState::Normal;
            }
            // 单引号字符串不跨行（三引号除外）
            if let ScanState::Str(_, false) = state {
                state = ScanState::Normal;
            }
            i += 1;
            continue;
        }

        match state {
            ScanState::Normal => match c {
                '(' | '[' | '{' => stack.push((c, line)),
                ')' | ']' | '}' => {
                    let expected = match c {
                        ')' => '(',
                        ']' => '[',
                        _ => '{',
                    };
                    match stack.pop() {
                        Some((open, _)) if open == expected => {}
                        Some((open, opened)) => errors.push(Issue::syntax(
                            Some(line),
                            format!("mismatched '{}' closing '{}' opened at line {}", c, open, opened),
                        )),
                        None => errors.push(Issue::syntax(
                            Some(line),
                            format!("unmatched closing '{}'", c),
                        )),
                    }
                }
                '"' | '\'' => {
                    // Rust 中的单引号多为生命周期或字符字面量：字面量整体跳过，生命周期按普通字符处理
                    if c == '\'' && kind == ContentKind::Rust {
                        if i + 2 < chars.len() && chars[i + 1] != '\\' && chars[i + 2] == '\'' {
                            i += 3;
                        } else if i + 3 < chars.len() && chars[i + 1] == '\\' && chars[i + 3] == '\'' {
                            i += 4;
                        } else {
                            i += 1;
                        }
                        continue;
                    }
                    let triple = kind == ContentKind::Python
                        && i + 2 < chars.len()
                        && chars[i + 1] == c
                        && chars[i + 2] == c;
                    if triple {
                        i += 2;
                    }
                    str_opened_at = line;
                    state = ScanState::Str(c, triple);
                }
                '#' if line_comment == Some('#') => state = ScanState::LineComment,
                '/' if slash_comments && i + 1 < chars.len() => match chars[i + 1] {
                    '/' => {
                        state = ScanState::LineComment;
                        i += 1;
                    }
                    '*' => {
                        state = ScanState::BlockComment;
                        i += 1;
                    }
                    _ => {}
                },
                _ => {}
            },
            ScanState::LineComment => {}
            ScanState::BlockComment => {
                if c == '*' && i + 1 < chars.len() && chars[i + 1] == '/' {
                    state = ScanState::Normal;
                    i += 1;
                }
            }
            ScanState::Str(delim, triple) => {
                if c == '\\' {
                    i += 2;
                    continue;
                }
                if c == delim {
                    if triple {
                        if i + 2 < chars.len() && chars[i + 1] == delim && chars[i + 2] == delim {
                            state = ScanState::Normal;
                            i += 2;
                        }
                    } else {
                        state = ScanState::Normal;
                    }
                }
            }
        }
        i += 1;
    }

    if let ScanState::Str(delim, true) = state {
        errors.push(Issue::syntax(
            Some(str_opened_at),
            format!("unterminated string starting with {0}{0}{0}", delim),
        ));
    }
    for (open, opened) in stack {
        errors.push(Issue::syntax(
            Some(opened),
            format!("unclosed '{}'", open),
        ));
    }
}

const PY_BLOCK_KEYWORDS: &[&str] = &[
    "def", "class", "if", "elif", "else", "for", "while", "try", "except", "finally", "with",
];

/// Python 块头检查：def/class/if 等行必须以冒号结尾，且其后应有缩进体
fn check_python_blocks(content: &str, errors: &mut Vec<Issue>) {
    let lines: Vec<&str> = content.lines().collect();
    for (idx, raw) in lines.iter().enumerate() {
        let line = strip_py_comment(raw);
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let first = trimmed.split_whitespace().next().unwrap_or("");
        let keyword = first.trim_end_matches(':');
        if !PY_BLOCK_KEYWORDS.contains(&keyword) {
            continue;
        }
        // 行内延续（如 "if x: return y"）或反斜杠续行不做进一步判断
        if trimmed.ends_with('\\') || trimmed.contains(": ") {
            continue;
        }
        if !trimmed.ends_with(':') {
            // 括号未闭合说明是多行签名，交给配对检查
            let opens = trimmed.matches('(').count();
            let closes = trimmed.matches(')').count();
            if opens == closes {
                errors.push(Issue::syntax(
                    Some(idx + 1),
                    format!("'{}' statement missing trailing ':'", keyword),
                ));
            }
            continue;
        }
        // 下一条非空行应比块头缩进更深
        let header_indent = indent_width(raw);
        if let Some(next) = lines[idx + 1..]
            .iter()
            .find(|l| !strip_py_comment(l).trim().is_empty())
        {
            if indent_width(next) <= header_indent {
                errors.push(Issue::syntax(
                    Some(idx + 1),
                    format!("'{}' block has no indented body", keyword),
                ));
            }
        } else {
            errors.push(Issue::syntax(
                Some(idx + 1),
                format!("'{}' block has no indented body", keyword),
            ));
        }
    }
}

/// Python import 形态检查：空 import、from 缺 import 子句、通配符警告
fn check_python_imports(content: &str, errors: &mut Vec<Issue>, warnings: &mut Vec<Issue>) {
    for (idx, raw) in content.lines().enumerate() {
        let line = strip_py_comment(raw);
        let trimmed = line.trim();
        if trimmed == "import" || trimmed == "from" {
            errors.push(Issue::import(Some(idx + 1), "incomplete import statement"));
            continue;
        }
        if trimmed.starts_with("from ") && !trimmed.contains(" import ") {
            errors.push(Issue::import(
                Some(idx + 1),
                "'from' statement missing 'import' clause",
            ));
        }
        if trimmed.starts_with("from ") && trimmed.ends_with("import *") {
            warnings.push(Issue::import(Some(idx + 1), "wildcard import"));
        }
    }
}

/// Rust use 语句形态检查：`use` 行必须以分号结束（多行 use 块由配对检查兜底）
fn check_rust_use_lines(content: &str, errors: &mut Vec<Issue>) {
    for (idx, raw) in content.lines().enumerate() {
        let trimmed = raw.trim();
        if trimmed.starts_with("use ")
            && !trimmed.ends_with(';')
            && !trimmed.ends_with('{')
            && !trimmed.ends_with(',')
        {
            errors.push(Issue::import(Some(idx + 1), "'use' statement missing ';'"));
        }
    }
}

fn strip_py_comment(line: &str) -> &str {
    match line.find('#') {
        Some(pos) => &line[..pos],
        None => line,
    }
}

fn indent_width(line: &str) -> usize {
    line.chars()
        .take_while(|c| *c == ' ' || *c == '\t')
        .map(|c| if c == '\t' { 4 } else { 1 })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validate(content: &str, kind: ContentKind) -> ValidationResult {
        CodeValidator::new().validate(content, kind)
    }

    #[test]
    fn test_clean_python_passes() {
        let code = "import os\n\ndef add(a, b):\n    return a + b\n";
        let result = validate(code, ContentKind::Python);
        assert!(result.valid, "errors: {:?}", result.errors);
    }

    #[test]
    fn test_missing_colon_flagged() {
        let code = "def add(a, b)\n    return a + b\n";
        let result = validate(code, ContentKind::Python);
        assert!(!result.valid);
        assert!(result.errors.iter().any(|e| e.message.contains("':'")));
    }

    #[test]
    fn test_unbalanced_paren_flagged() {
        let code = "def add(a, b:\n    return (a + b\n";
        let result = validate(code, ContentKind::Python);
        assert!(!result.valid);
    }

    #[test]
    fn test_empty_content_is_syntax_error() {
        let result = validate("   \n", ContentKind::Python);
        assert!(!result.valid);
        assert_eq!(result.errors[0].message, "content is empty");
    }

    #[test]
    fn test_braces_inside_strings_ignored() {
        let code = "x = \"{ not a brace )\"\nprint(x)\n";
        let result = validate(code, ContentKind::Python);
        assert!(result.valid, "errors: {:?}", result.errors);
    }

    #[test]
    fn test_braces_inside_comments_ignored() {
        let code = "fn main() {\n    // } stray close in comment\n    let x = 1;\n}\n";
        let result = validate(code, ContentKind::Rust);
        assert!(result.valid, "errors: {:?}", result.errors);
    }

    #[test]
    fn test_incomplete_from_import() {
        let code = "from os\nprint('x')\n";
        let result = validate(code, ContentKind::Python);
        assert!(!result.valid);
        assert!(result
            .errors
            .iter()
            .any(|e| e.kind == crate::validation::IssueKind::Import));
    }

    #[test]
    fn test_wildcard_import_is_warning() {
        let code = "from os.path import *\nprint('x')\n";
        let result = validate(code, ContentKind::Python);
        assert!(result.valid);
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn test_rust_use_missing_semicolon() {
        let code = "use std::fmt\n\nfn main() {}\n";
        let result = validate(code, ContentKind::Rust);
        assert!(!result.valid);
    }

    #[test]
    fn test_unknown_kind_only_delimiters() {
        let code = "def broken(\n";
        let result = validate(code, ContentKind::Unknown);
        // Unknown 不做 Python 规则，只有未闭合括号
        assert!(!result.valid);
        assert!(result.errors.iter().all(|e| e.message.contains("unclosed")));
    }

    #[test]
    fn test_idempotent_on_same_input() {
        let code = "def add(a, b)\n    return a + b\n";
        let first = validate(code, ContentKind::Python);
        let second = validate(code, ContentKind::Python);
        assert_eq!(first, second);
    }

    #[test]
    fn test_garbage_input_does_not_panic() {
        let garbage = ")]}\"'\\\u{0}\u{7f}((((";
        let _ = validate(garbage, ContentKind::Python);
        let _ = validate(garbage, ContentKind::Rust);
        let _ = validate(garbage, ContentKind::Unknown);
    }

    #[test]
    fn test_python_docstring_ignored() {
        let code = "def f():\n    \"\"\"docstring with ( unbalanced\"\"\"\n    return 1\n";
        let result = validate(code, ContentKind::Python);
        assert!(result.valid, "errors: {:?}", result.errors);
    }
}
