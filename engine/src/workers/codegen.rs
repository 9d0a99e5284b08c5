use async_trait::async_trait;
use std::sync::Arc;

use sdk::{FailureKind, Worker, WorkerKind, WorkerResponse};

use crate::llm::{strip_code_fences, GenerationProvider};

/// Generates Python code for a task
pub struct CodeGenWorker {
    provider: Arc<dyn GenerationProvider>,
}

impl CodeGenWorker {
    pub const NAME: &'static str = "CodeGenWorker";

    pub fn new(provider: Arc<dyn GenerationProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Worker for CodeGenWorker {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn kind(&self) -> WorkerKind {
        WorkerKind::CodeGen
    }

    async fn execute(&self, task: &str) -> WorkerResponse {
        let reply = match self.provider.generate(task).await {
            Ok(reply) => reply,
            Err(e) => return super::provider_failure(Self::NAME, task, e),
        };

        let code = strip_code_fences(&reply);
        if code.is_empty() {
            return WorkerResponse::error(
                Self::NAME,
                task,
                FailureKind::Provider,
                format!("{} returned no code", self.provider.name()),
            );
        }

        let lines = code.split('\n').count();
        let check = check_structure(&code);
        if let Err(problem) = &check {
            tracing::debug!("Generated code failed structure check: {}", problem);
        }

        let mut response = WorkerResponse::success(Self::NAME, task, code)
            .with_metadata("language", "python")
            .with_metadata("lines", lines)
            .with_metadata("status", "generated")
            .with_metadata("provider", self.provider.name())
            .with_metadata("model", self.provider.model())
            .with_metadata("syntax_checked", true)
            .with_metadata("valid", check.is_ok());
        if let Err(problem) = check {
            response = response.with_metadata("syntax_error", problem);
        }
        response
    }
}

/// Lightweight structural check of Python source.
///
/// Verifies the program is non-empty, every string literal is terminated and
/// brackets are balanced outside strings and comments. This is not a parser:
/// indentation and grammar errors surface when the code runs.
pub fn check_structure(code: &str) -> Result<(), String> {
    if code.trim().is_empty() {
        return Err("empty program".to_string());
    }

    let chars: Vec<char> = code.chars().collect();
    let mut stack: Vec<(char, usize)> = Vec::new();
    let mut line = 1;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\n' => line += 1,
            '#' => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
                continue;
            }
            '\'' | '"' => {
                let triple = i + 2 < chars.len() && chars[i + 1] == c && chars[i + 2] == c;
                let start_line = line;
                i += if triple { 3 } else { 1 };
                loop {
                    let Some(&d) = chars.get(i) else {
                        return Err(format!("unterminated string starting on line {}", start_line));
                    };
                    match d {
                        '\\' => {
                            if chars.get(i + 1) == Some(&'\n') {
                                line += 1;
                            }
                            i += 2;
                            continue;
                        }
                        '\n' if !triple => {
                            return Err(format!(
                                "unterminated string starting on line {}",
                                start_line
                            ));
                        }
                        '\n' => line += 1,
                        _ if d == c && !triple => {
                            i += 1;
                            break;
                        }
                        _ if d == c
                            && i + 2 < chars.len()
                            && chars[i + 1] == c
                            && chars[i + 2] == c =>
                        {
                            i += 3;
                            break;
                        }
                        _ => {}
                    }
                    i += 1;
                }
                continue;
            }
            '(' | '[' | '{' => stack.push((c, line)),
            ')' | ']' | '}' => {
                let expected = match c {
                    ')' => '(',
                    ']' => '[',
                    _ => '{',
                };
                match stack.pop() {
                    Some((open, _)) if open == expected => {}
                    _ => return Err(format!("unmatched '{}' on line {}", c, line)),
                }
            }
            _ => {}
        }
        i += 1;
    }

    match stack.pop() {
        Some((open, from)) => Err(format!("unclosed '{}' from line {}", open, from)),
        None => Ok(()),
    }
}
