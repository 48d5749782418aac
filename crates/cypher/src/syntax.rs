//! Lightweight structural checks over Cypher scripts. This is not a parser:
//! it only catches the damage a truncated or chatty model response does.

use regex::Regex;
use std::sync::LazyLock;

use crate::compiler::CompileError;

static KEYWORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(CREATE|MERGE|MATCH|SET|RETURN)\b").unwrap());

pub fn contains_keyword(script: &str) -> bool {
    KEYWORD.is_match(script)
}

/// Balanced `()`, `{}` and `[]` outside string literals and `//` comments,
/// terminated strings, and at least one statement keyword.
pub fn check_syntax(script: &str) -> Result<(), CompileError> {
    if script.trim().is_empty() {
        return Err(CompileError::Empty);
    }

    let mut open: Vec<char> = Vec::new();
    let mut scanner = Scanner::new(script);
    while let Some(token) = scanner.next_token() {
        let Token::Code(c) = token else { continue };
        match c {
            '(' | '{' | '[' => open.push(c),
            ')' | '}' | ']' => {
                let expected = match c {
                    ')' => '(',
                    '}' => '{',
                    _ => '[',
                };
                if open.pop() != Some(expected) {
                    return Err(CompileError::Unbalanced(c));
                }
            }
            _ => {}
        }
    }

    if scanner.in_string() {
        return Err(CompileError::UnterminatedString);
    }
    if let Some(c) = open.pop() {
        return Err(CompileError::Unbalanced(c));
    }
    if !contains_keyword(script) {
        return Err(CompileError::NoKeyword);
    }
    Ok(())
}

/// Split a script into statements on `;` outside string literals. Comment
/// lines are dropped and blank statements skipped.
pub fn split_statements(script: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();

    let mut scanner = Scanner::new(script);
    while let Some(token) = scanner.next_token() {
        match token {
            Token::Code(';') => {
                push_statement(&mut statements, &mut current);
            }
            Token::Code(c) | Token::Quoted(c) => current.push(c),
            Token::Comment => {}
        }
    }
    push_statement(&mut statements, &mut current);

    statements
}

fn push_statement(statements: &mut Vec<String>, current: &mut String) {
    let statement = current.trim();
    if !statement.is_empty() {
        statements.push(statement.to_string());
    }
    current.clear();
}

enum Token {
    /// Outside any string literal
    Code(char),
    /// Inside a string literal, quotes included
    Quoted(char),
    /// A whole `//` comment, newline excluded
    Comment,
}

struct Scanner<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    quote: Option<char>,
    escaped: bool,
}

impl<'a> Scanner<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            chars: text.chars().peekable(),
            quote: None,
            escaped: false,
        }
    }

    fn in_string(&self) -> bool {
        self.quote.is_some()
    }

    fn next_token(&mut self) -> Option<Token> {
        let c = self.chars.next()?;

        if let Some(quote) = self.quote {
            if self.escaped {
                self.escaped = false;
            } else if c == '\\' {
                self.escaped = true;
            } else if c == quote {
                self.quote = None;
            }
            return Some(Token::Quoted(c));
        }

        match c {
            '\'' | '"' | '`' => {
                self.quote = Some(c);
                Some(Token::Quoted(c))
            }
            '/' if self.chars.peek() == Some(&'/') => {
                while self.chars.peek().is_some_and(|&n| n != '\n') {
                    self.chars.next();
                }
                Some(Token::Comment)
            }
            _ => Some(Token::Code(c)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keywords() {
        assert!(contains_keyword("merge (n:Person {id: 'a'})"));
        assert!(contains_keyword("MATCH (n) RETURN n"));
        assert!(!contains_keyword("I could not produce a script, sorry."));
        assert!(!contains_keyword("UNMERGED SETTINGS"));
    }

    #[test]
    fn test_balanced_script_passes() {
        let script = "CREATE CONSTRAINT person_id_unique IF NOT EXISTS FOR (n:Person) REQUIRE n.id IS UNIQUE;\n\
                      MERGE (n:Person {id: 'e1'}) SET n.tags = ['a', 'b'];";
        assert_eq!(check_syntax(script), Ok(()));
    }

    #[test]
    fn test_brackets_inside_strings_ignored() {
        let script = "MERGE (n:Concept {id: 'e1'}) SET n.label = 'smile :) {or} [not]';";
        assert_eq!(check_syntax(script), Ok(()));
    }

    #[test]
    fn test_escaped_quote_stays_in_string() {
        let script = r"MERGE (n:Person {id: 'e1'}) SET n.label = 'O\'Brien (senior';";
        assert_eq!(check_syntax(script), Ok(()));
    }

    #[test]
    fn test_comments_ignored() {
        let script = "// nodes (\nMERGE (n:Person {id: 'e1'});";
        assert_eq!(check_syntax(script), Ok(()));
    }

    #[test]
    fn test_unbalanced() {
        assert_eq!(check_syntax("MERGE (n:Person {id: 'e1'}"), Err(CompileError::Unbalanced('(')));
        assert_eq!(check_syntax("MERGE (n:Person {id: 'e1')})"), Err(CompileError::Unbalanced(')')));
        assert_eq!(check_syntax("MERGE (n {id: 'e1})"), Err(CompileError::UnterminatedString));
    }

    #[test]
    fn test_missing_keyword() {
        assert_eq!(check_syntax("(a)-->(b)"), Err(CompileError::NoKeyword));
        assert_eq!(check_syntax("  \n"), Err(CompileError::Empty));
    }

    #[test]
    fn test_split_statements() {
        let script = "// Constraints\n\
                      CREATE CONSTRAINT x IF NOT EXISTS FOR (n:Person) REQUIRE n.id IS UNIQUE;\n\
                      \n\
                      // Nodes\n\
                      MERGE (n:Person {id: 'a;b'}) SET n.label = 'A';\n\
                      MERGE (n:Person {id: 'c'})";

        let statements = split_statements(script);
        assert_eq!(statements.len(), 3);
        assert!(statements[0].starts_with("CREATE CONSTRAINT"));
        assert_eq!(statements[1], "MERGE (n:Person {id: 'a;b'}) SET n.label = 'A'");
        assert_eq!(statements[2], "MERGE (n:Person {id: 'c'})");
    }
}
