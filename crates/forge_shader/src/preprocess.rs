//! Minimal GLSL preprocessor used for reflection
//!
//! Only conditional structure matters for reflection: a uniform declared
//! inside `#ifdef SHADOW_MAP` exists in the shadow variant and not in the
//! plain one. The preprocessor evaluates `#define`, `#undef`, `#ifdef`,
//! `#ifndef`, `#if`, `#elif`, `#else` and `#endif`, and keeps the lines that
//! survive. Macro bodies are never substituted into code; symbol values are
//! only used for array sizes and `#if` arithmetic.

use std::collections::HashMap;

use crate::{Result, ShaderError};

/// Lines that survived conditional evaluation plus the final symbol table
#[derive(Debug, Clone, Default)]
pub struct PreprocessedSource {
    pub lines: Vec<String>,
    pub symbols: HashMap<String, Option<String>>,
}

impl PreprocessedSource {
    pub fn is_defined(&self, name: &str) -> bool {
        self.symbols.contains_key(name)
    }

    /// Integer value of a symbol defined with a numeric body
    pub fn integer(&self, name: &str) -> Option<i64> {
        self.symbols.get(name)?.as_deref()?.trim().parse().ok()
    }

    pub fn text(&self) -> String {
        let mut text = self.lines.join("\n");
        text.push('\n');
        text
    }
}

struct Frame {
    parent_active: bool,
    active: bool,
    taken: bool,
    seen_else: bool,
}

#[derive(Debug, Default)]
pub struct Preprocessor {
    symbols: HashMap<String, Option<String>>,
}

impl Preprocessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a symbol as if it were `#define`d before the source
    pub fn define(&mut self, name: impl Into<String>, value: Option<String>) {
        self.symbols.insert(name.into(), value);
    }

    pub fn run(mut self, source: &str) -> Result<PreprocessedSource> {
        let mut frames: Vec<Frame> = Vec::new();
        let mut lines = Vec::new();

        for (number, raw) in source.lines().enumerate() {
            let line_no = number + 1;
            let active = frames.last().map_or(true, |f| f.active);
            let trimmed = raw.trim();

            let Some(directive) = trimmed.strip_prefix('#') else {
                if active {
                    lines.push(raw.to_string());
                }
                continue;
            };
            let directive = directive.trim_start();
            let (keyword, rest) = directive
                .split_once(|c: char| c.is_whitespace())
                .map(|(k, r)| (k, r.trim()))
                .unwrap_or((directive, ""));

            match keyword {
                "ifdef" | "ifndef" => {
                    let defined = self.symbols.contains_key(rest);
                    let cond = if keyword == "ifdef" { defined } else { !defined };
                    frames.push(Frame {
                        parent_active: active,
                        active: active && cond,
                        taken: cond,
                        seen_else: false,
                    });
                }
                "if" => {
                    let cond = self.evaluate(rest, line_no)?;
                    frames.push(Frame {
                        parent_active: active,
                        active: active && cond,
                        taken: cond,
                        seen_else: false,
                    });
                }
                "elif" => {
                    let frame = frames.last_mut().ok_or_else(|| unbalanced(line_no, "#elif"))?;
                    if frame.seen_else {
                        return Err(unbalanced(line_no, "#elif after #else"));
                    }
                    if frame.taken {
                        frame.active = false;
                    } else {
                        let parent_active = frame.parent_active;
                        let cond = self.evaluate(rest, line_no)?;
                        let frame = frames.last_mut().ok_or_else(|| unbalanced(line_no, "#elif"))?;
                        frame.active = parent_active && cond;
                        frame.taken = cond;
                    }
                }
                "else" => {
                    let frame = frames.last_mut().ok_or_else(|| unbalanced(line_no, "#else"))?;
                    if frame.seen_else {
                        return Err(unbalanced(line_no, "duplicate #else"));
                    }
                    frame.seen_else = true;
                    frame.active = frame.parent_active && !frame.taken;
                    frame.taken = true;
                }
                "endif" => {
                    frames.pop().ok_or_else(|| unbalanced(line_no, "#endif"))?;
                }
                "define" if active => {
                    let (name, value) = match rest.split_once(|c: char| c.is_whitespace()) {
                        Some((name, value)) => (name, Some(value.trim().to_string())),
                        None => (rest, None),
                    };
                    if name.is_empty() {
                        return Err(ShaderError::Preprocess {
                            line: line_no,
                            message: "#define without a name".into(),
                        });
                    }
                    self.symbols.insert(name.to_string(), value);
                }
                "undef" if active => {
                    self.symbols.remove(rest);
                }
                // #version, #extension, #pragma, #line and inactive defines pass through
                _ => {
                    if active {
                        lines.push(raw.to_string());
                    }
                }
            }
        }

        if !frames.is_empty() {
            return Err(ShaderError::Preprocess {
                line: source.lines().count(),
                message: "unterminated conditional block".into(),
            });
        }

        Ok(PreprocessedSource {
            lines,
            symbols: self.symbols,
        })
    }

    /// Evaluate `a || b && !defined(C) && N >= 2` style conditions
    fn evaluate(&self, expr: &str, line: usize) -> Result<bool> {
        let mut any = false;
        for alternative in expr.split("||") {
            let mut all = true;
            for term in alternative.split("&&") {
                all &= self.evaluate_term(term.trim(), line)?;
            }
            any |= all;
        }
        Ok(any)
    }

    fn evaluate_term(&self, term: &str, line: usize) -> Result<bool> {
        if let Some(inner) = term.strip_prefix('!') {
            return Ok(!self.evaluate_term(inner.trim(), line)?);
        }
        if let Some(inner) = term.strip_prefix('(').and_then(|t| t.strip_suffix(')')) {
            return self.evaluate(inner, line);
        }
        if let Some(rest) = term.strip_prefix("defined") {
            let name = rest.trim().trim_start_matches('(').trim_end_matches(')').trim();
            return Ok(self.symbols.contains_key(name));
        }

        for op in ["==", "!=", ">=", "<=", ">", "<"] {
            if let Some((lhs, rhs)) = term.split_once(op) {
                let lhs = self.value(lhs.trim(), line)?;
                let rhs = self.value(rhs.trim(), line)?;
                return Ok(match op {
                    "==" => lhs == rhs,
                    "!=" => lhs != rhs,
                    ">=" => lhs >= rhs,
                    "<=" => lhs <= rhs,
                    ">" => lhs > rhs,
                    _ => lhs < rhs,
                });
            }
        }
        Ok(self.value(term, line)? != 0)
    }

    fn value(&self, token: &str, line: usize) -> Result<i64> {
        if let Ok(n) = token.parse::<i64>() {
            return Ok(n);
        }
        match self.symbols.get(token) {
            Some(Some(body)) => body.trim().parse().map_err(|_| ShaderError::Preprocess {
                line,
                message: format!("'{}' is not an integer", token),
            }),
            // Defined without a value, or undefined, as in C
            Some(None) => Ok(1),
            None => Ok(0),
        }
    }
}

fn unbalanced(line: usize, what: &str) -> ShaderError {
    ShaderError::Preprocess {
        line,
        message: format!("unbalanced {}", what),
    }
}
