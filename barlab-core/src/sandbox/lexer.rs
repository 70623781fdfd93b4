//! Line-oriented lexer with Python-style indentation blocks.
//!
//! Emits `Indent`/`Dedent` pairs from leading whitespace, suppresses
//! newlines inside brackets (implicit line joining), and treats `;` as a
//! statement separator.

use super::SandboxErrorKind;

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Newline,
    Indent,
    Dedent,
    End,

    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),

    KwIf,
    KwElif,
    KwElse,
    KwFor,
    KwWhile,
    KwIn,
    KwImport,
    KwAnd,
    KwOr,
    KwNot,
    KwTrue,
    KwFalse,
    KwNone,
    KwBreak,
    KwContinue,
    KwPass,

    Plus,
    Minus,
    Star,
    DoubleStar,
    Slash,
    DoubleSlash,
    Percent,

    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,

    EqEq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,

    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,

    Comma,
    Dot,
    Colon,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub tok: Tok,
    pub line: usize,
}

fn keyword(ident: &str) -> Option<Tok> {
    Some(match ident {
        "if" => Tok::KwIf,
        "elif" => Tok::KwElif,
        "else" => Tok::KwElse,
        "for" => Tok::KwFor,
        "while" => Tok::KwWhile,
        "in" => Tok::KwIn,
        "import" => Tok::KwImport,
        "and" => Tok::KwAnd,
        "or" => Tok::KwOr,
        "not" => Tok::KwNot,
        "True" => Tok::KwTrue,
        "False" => Tok::KwFalse,
        "None" => Tok::KwNone,
        "break" => Tok::KwBreak,
        "continue" => Tok::KwContinue,
        "pass" => Tok::KwPass,
        _ => return None,
    })
}

/// Tokenize a full code block.
pub fn tokenize(code: &str) -> Result<Vec<Token>, SandboxErrorKind> {
    let mut tokens: Vec<Token> = Vec::new();
    let mut indents: Vec<usize> = vec![0];
    let mut bracket_depth: usize = 0;

    for (line_no, line) in code.lines().enumerate() {
        let line_no = line_no + 1;

        if bracket_depth == 0 {
            let indent = line
                .chars()
                .take_while(|c| *c == ' ' || *c == '\t')
                .map(|c| if c == '\t' { 4 } else { 1 })
                .sum::<usize>();
            let rest = line.trim_start();
            if rest.is_empty() || rest.starts_with('#') {
                continue;
            }
            let current = *indents.last().unwrap_or(&0);
            if indent > current {
                indents.push(indent);
                tokens.push(Token {
                    tok: Tok::Indent,
                    line: line_no,
                });
            } else if indent < current {
                while indents.len() > 1 && *indents.last().unwrap_or(&0) > indent {
                    indents.pop();
                    tokens.push(Token {
                        tok: Tok::Dedent,
                        line: line_no,
                    });
                }
                if *indents.last().unwrap_or(&0) != indent {
                    return Err(SandboxErrorKind::Syntax(format!(
                        "第 {line_no} 行缩进错误"
                    )));
                }
            }
        }

        lex_line(line, line_no, &mut tokens, &mut bracket_depth)?;

        if bracket_depth == 0 {
            tokens.push(Token {
                tok: Tok::Newline,
                line: line_no,
            });
        }
    }

    if bracket_depth > 0 {
        return Err(SandboxErrorKind::Syntax("括号未闭合".into()));
    }
    let last_line = tokens.last().map_or(1, |t| t.line);
    while indents.len() > 1 {
        indents.pop();
        tokens.push(Token {
            tok: Tok::Dedent,
            line: last_line,
        });
    }
    tokens.push(Token {
        tok: Tok::End,
        line: last_line,
    });
    Ok(tokens)
}

fn lex_line(
    line: &str,
    line_no: usize,
    tokens: &mut Vec<Token>,
    bracket_depth: &mut usize,
) -> Result<(), SandboxErrorKind> {
    let chars: Vec<char> = line.chars().collect();
    let mut i = 0;
    let push = |tokens: &mut Vec<Token>, tok: Tok| tokens.push(Token { tok, line: line_no });

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' => {
                i += 1;
            }
            '#' => break,
            ';' => {
                if *bracket_depth > 0 {
                    return Err(SandboxErrorKind::Syntax(format!(
                        "第 {line_no} 行: 括号内不允许 ';'"
                    )));
                }
                push(tokens, Tok::Newline);
                i += 1;
            }
            '\'' | '"' => {
                let quote = c;
                i += 1;
                let mut text = String::new();
                let mut closed = false;
                while i < chars.len() {
                    let ch = chars[i];
                    if ch == '\\' && i + 1 < chars.len() {
                        let esc = chars[i + 1];
                        text.push(match esc {
                            'n' => '\n',
                            't' => '\t',
                            '\\' => '\\',
                            '\'' => '\'',
                            '"' => '"',
                            other => other,
                        });
                        i += 2;
                    } else if ch == quote {
                        closed = true;
                        i += 1;
                        break;
                    } else {
                        text.push(ch);
                        i += 1;
                    }
                }
                if !closed {
                    return Err(SandboxErrorKind::Syntax(format!(
                        "第 {line_no} 行: 字符串未闭合"
                    )));
                }
                push(tokens, Tok::Str(text));
            }
            '0'..='9' => {
                let start = i;
                let mut is_float = false;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '_') {
                    i += 1;
                }
                if i < chars.len() && chars[i] == '.' {
                    // `.` starts a fraction unless followed by an identifier (method syntax)
                    if i + 1 >= chars.len() || !chars[i + 1].is_ascii_alphabetic() {
                        is_float = true;
                        i += 1;
                        while i < chars.len() && chars[i].is_ascii_digit() {
                            i += 1;
                        }
                    }
                }
                if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                    let mut j = i + 1;
                    if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
                        j += 1;
                    }
                    if j < chars.len() && chars[j].is_ascii_digit() {
                        is_float = true;
                        i = j;
                        while i < chars.len() && chars[i].is_ascii_digit() {
                            i += 1;
                        }
                    }
                }
                let text: String = chars[start..i].iter().filter(|c| **c != '_').collect();
                if is_float {
                    let v = text.parse::<f64>().map_err(|_| {
                        SandboxErrorKind::Syntax(format!("第 {line_no} 行: 非法数字 '{text}'"))
                    })?;
                    push(tokens, Tok::Float(v));
                } else {
                    match text.parse::<i64>() {
                        Ok(v) => push(tokens, Tok::Int(v)),
                        // Overflowing integer literal falls back to float
                        Err(_) => {
                            let v = text.parse::<f64>().map_err(|_| {
                                SandboxErrorKind::Syntax(format!(
                                    "第 {line_no} 行: 非法数字 '{text}'"
                                ))
                            })?;
                            push(tokens, Tok::Float(v));
                        }
                    }
                }
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let ident: String = chars[start..i].iter().collect();
                match keyword(&ident) {
                    Some(kw) => push(tokens, kw),
                    None => push(tokens, Tok::Ident(ident)),
                }
            }
            '(' => {
                *bracket_depth += 1;
                push(tokens, Tok::LParen);
                i += 1;
            }
            ')' => {
                *bracket_depth = bracket_depth.saturating_sub(1);
                push(tokens, Tok::RParen);
                i += 1;
            }
            '[' => {
                *bracket_depth += 1;
                push(tokens, Tok::LBracket);
                i += 1;
            }
            ']' => {
                *bracket_depth = bracket_depth.saturating_sub(1);
                push(tokens, Tok::RBracket);
                i += 1;
            }
            '{' => {
                *bracket_depth += 1;
                push(tokens, Tok::LBrace);
                i += 1;
            }
            '}' => {
                *bracket_depth = bracket_depth.saturating_sub(1);
                push(tokens, Tok::RBrace);
                i += 1;
            }
            ',' => {
                push(tokens, Tok::Comma);
                i += 1;
            }
            '.' => {
                push(tokens, Tok::Dot);
                i += 1;
            }
            ':' => {
                push(tokens, Tok::Colon);
                i += 1;
            }
            '+' | '-' | '*' | '/' | '%' | '=' | '!' | '<' | '>' => {
                let next = chars.get(i + 1).copied();
                let (tok, advance) = match (c, next) {
                    ('*', Some('*')) => (Tok::DoubleStar, 2),
                    ('/', Some('/')) => (Tok::DoubleSlash, 2),
                    ('=', Some('=')) => (Tok::EqEq, 2),
                    ('!', Some('=')) => (Tok::NotEq, 2),
                    ('<', Some('=')) => (Tok::LtEq, 2),
                    ('>', Some('=')) => (Tok::GtEq, 2),
                    ('+', Some('=')) => (Tok::PlusAssign, 2),
                    ('-', Some('=')) => (Tok::MinusAssign, 2),
                    ('*', Some('=')) => (Tok::StarAssign, 2),
                    ('/', Some('=')) => (Tok::SlashAssign, 2),
                    ('+', _) => (Tok::Plus, 1),
                    ('-', _) => (Tok::Minus, 1),
                    ('*', _) => (Tok::Star, 1),
                    ('/', _) => (Tok::Slash, 1),
                    ('%', _) => (Tok::Percent, 1),
                    ('=', _) => (Tok::Assign, 1),
                    ('<', _) => (Tok::Lt, 1),
                    ('>', _) => (Tok::Gt, 1),
                    ('!', _) => {
                        return Err(SandboxErrorKind::Syntax(format!(
                            "第 {line_no} 行: 非法字符 '!'"
                        )))
                    }
                    _ => unreachable!(),
                };
                push(tokens, tok);
                i += advance;
            }
            other => {
                return Err(SandboxErrorKind::Syntax(format!(
                    "第 {line_no} 行: 非法字符 '{other}'"
                )))
            }
        }
    }
    Ok(())
}
