//! Math expression tool
//!
//! Evaluates arithmetic expressions with a small hand-rolled parser instead
//! of handing strings to any kind of interpreter. Supported: + - * / ^,
//! parentheses, unary minus, `sqrt`/`abs`/`min`/`max`/`round`, `pi`, `e`.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{json, Value};

use super::traits::{str_arg, ErrorCode, Tool, ToolFailure, ToolMeta, ToolResult};
use crate::error::Result;

/// Built-in tool: safe arithmetic evaluation
pub struct MathCalcTool;

#[async_trait]
impl Tool for MathCalcTool {
    fn name(&self) -> &str {
        "math_calc"
    }

    fn description(&self) -> &str {
        "Evaluate an arithmetic expression, e.g. '2 + 3 * 4' or 'sqrt(16)'"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "expression": {
                    "type": "string",
                    "description": "Arithmetic expression to evaluate"
                }
            },
            "required": ["expression"]
        })
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(3)
    }

    async fn invoke(&self, args: Value) -> Result<ToolResult> {
        let started = Instant::now();
        let meta = |started: &Instant, args: Value| {
            ToolMeta::new("math_calc", started.elapsed().as_millis() as u64, args)
        };

        let Some(expression) = str_arg(&args, "expression") else {
            return Ok(ToolResult::failure(
                ToolFailure::new(ErrorCode::InvalidInput, "Missing 'expression' parameter"),
                meta(&started, args),
            ));
        };

        match evaluate(&expression) {
            Ok(result) => {
                // Render whole numbers without a trailing .0
                let rendered = if result.fract() == 0.0 && result.abs() < 1e15 {
                    json!(result as i64)
                } else {
                    json!(result)
                };
                Ok(ToolResult::success(
                    json!({"expression": expression, "result": rendered}),
                    meta(&started, args),
                ))
            }
            Err(msg) => Ok(ToolResult::failure(
                ToolFailure::new(ErrorCode::InvalidInput, msg),
                meta(&started, args),
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Expression evaluator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    LParen,
    RParen,
    Comma,
}

/// Evaluate an expression string
pub fn evaluate(expression: &str) -> std::result::Result<f64, String> {
    let tokens = tokenize(expression)?;
    let mut parser = Parser { tokens, pos: 0 };
    let value = parser.parse_expr(0)?;
    if parser.pos != parser.tokens.len() {
        return Err("Unexpected trailing input".to_string());
    }
    if !value.is_finite() {
        return Err("Result is not a finite number".to_string());
    }
    Ok(value)
}

fn tokenize(expression: &str) -> std::result::Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = expression.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' => i += 1,
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '^' => {
                tokens.push(Token::Caret);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '0'..='9' | '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let value = text
                    .parse::<f64>()
                    .map_err(|_| format!("Invalid number: {}", text))?;
                tokens.push(Token::Num(value));
            }
            c if c.is_ascii_alphabetic() => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => return Err(format!("Unexpected character: {}", other)),
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect_rparen(&mut self) -> std::result::Result<(), String> {
        match self.next() {
            Some(Token::RParen) => Ok(()),
            _ => Err("Expected closing parenthesis".to_string()),
        }
    }

    fn parse_expr(&mut self, min_bp: u8) -> std::result::Result<f64, String> {
        const UNARY_BP: u8 = 5;

        let mut lhs = match self.next() {
            Some(Token::Num(n)) => n,
            Some(Token::Ident(name)) => self.parse_ident(&name)?,
            Some(Token::Minus) => -self.parse_expr(UNARY_BP)?,
            Some(Token::Plus) => self.parse_expr(UNARY_BP)?,
            Some(Token::LParen) => {
                let value = self.parse_expr(0)?;
                self.expect_rparen()?;
                value
            }
            _ => return Err("Expected a value".to_string()),
        };

        loop {
            let op = match self.peek() {
                Some(Token::Plus) => Token::Plus,
                Some(Token::Minus) => Token::Minus,
                Some(Token::Star) => Token::Star,
                Some(Token::Slash) => Token::Slash,
                Some(Token::Caret) => Token::Caret,
                Some(Token::RParen) | Some(Token::Comma) | None => break,
                Some(other) => return Err(format!("Unexpected token: {:?}", other)),
            };

            let (lbp, rbp) = match op {
                Token::Plus | Token::Minus => (1, 2),
                Token::Star | Token::Slash => (3, 4),
                Token::Caret => (6, 5),
                _ => unreachable!(),
            };
            if lbp < min_bp {
                break;
            }
            self.next();

            let rhs = self.parse_expr(rbp)?;
            lhs = match op {
                Token::Plus => lhs + rhs,
                Token::Minus => lhs - rhs,
                Token::Star => lhs * rhs,
                Token::Slash => {
                    if rhs == 0.0 {
                        return Err("Division by zero".to_string());
                    }
                    lhs / rhs
                }
                Token::Caret => lhs.powf(rhs),
                _ => unreachable!(),
            };
        }

        Ok(lhs)
    }

    fn parse_ident(&mut self, name: &str) -> std::result::Result<f64, String> {
        match name {
            "pi" => return Ok(std::f64::consts::PI),
            "e" => return Ok(std::f64::consts::E),
            _ => {}
        }

        match self.next() {
            Some(Token::LParen) => {}
            _ => return Err(format!("Unknown identifier: {}", name)),
        }

        let mut args = vec![self.parse_expr(0)?];
        while matches!(self.peek(), Some(Token::Comma)) {
            self.next();
            args.push(self.parse_expr(0)?);
        }
        self.expect_rparen()?;

        let unary = |args: &[f64]| -> std::result::Result<f64, String> {
            if args.len() == 1 {
                Ok(args[0])
            } else {
                Err(format!("{} takes exactly one argument", name))
            }
        };

        match name {
            "sqrt" => {
                let x = unary(&args)?;
                if x < 0.0 {
                    Err("sqrt of a negative number".to_string())
                } else {
                    Ok(x.sqrt())
                }
            }
            "abs" => Ok(unary(&args)?.abs()),
            "round" => Ok(unary(&args)?.round()),
            "min" => args
                .iter()
                .copied()
                .reduce(f64::min)
                .ok_or_else(|| "min needs arguments".to_string()),
            "max" => args
                .iter()
                .copied()
                .reduce(f64::max)
                .ok_or_else(|| "max needs arguments".to_string()),
            other => Err(format!("Unknown function: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_arithmetic() {
        assert_eq!(evaluate("2 + 3 * 4").unwrap(), 14.0);
        assert_eq!(evaluate("(2 + 3) * 4").unwrap(), 20.0);
        assert_eq!(evaluate("10 / 4").unwrap(), 2.5);
        assert_eq!(evaluate("-3 + 5").unwrap(), 2.0);
    }

    #[test]
    fn test_power_is_right_associative() {
        assert_eq!(evaluate("2 ^ 3 ^ 2").unwrap(), 512.0);
        assert_eq!(evaluate("-2 ^ 2").unwrap(), -4.0);
    }

    #[test]
    fn test_functions_and_constants() {
        assert_eq!(evaluate("sqrt(16)").unwrap(), 4.0);
        assert_eq!(evaluate("max(1, 7, 3)").unwrap(), 7.0);
        assert_eq!(evaluate("min(4, 2)").unwrap(), 2.0);
        assert_eq!(evaluate("abs(-5)").unwrap(), 5.0);
        assert!((evaluate("pi").unwrap() - std::f64::consts::PI).abs() < 1e-12);
    }

    #[test]
    fn test_errors() {
        assert!(evaluate("1 / 0").is_err());
        assert!(evaluate("sqrt(-1)").is_err());
        assert!(evaluate("2 +").is_err());
        assert!(evaluate("nope(3)").is_err());
        assert!(evaluate("2; print()").is_err());
    }

    #[tokio::test]
    async fn test_tool_renders_whole_numbers_plainly() {
        let tool = MathCalcTool;
        let result = tool
            .invoke(json!({"expression": "2+2"}))
            .await
            .unwrap();
        assert!(result.ok);
        assert_eq!(result.data.unwrap()["result"], 4);
    }
}
