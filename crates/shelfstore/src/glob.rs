//! Glob-style key patterns using nom
//!
//! Pattern syntax:
//! ```text
//! *     any sequence of characters (including none)
//! ?     exactly one character
//! \x    the character x, literally
//! ```
//!
//! Example: `products:*` matches `products:1` and `products:list`.

use std::str::FromStr;

use nom::{
    branch::alt,
    bytes::complete::is_not,
    character::complete::{anychar, char},
    combinator::{all_consuming, map, value},
    multi::many0,
    sequence::preceded,
    IResult,
};

use crate::error::{Error, Result};

/// One parsed element of a pattern
#[derive(Debug, Clone, PartialEq)]
enum Token {
    Literal(String),
    Star,
    Single,
}

/// Matching atom, one per character of input consumed
#[derive(Debug, Clone, Copy, PartialEq)]
enum Atom {
    Char(char),
    Star,
    Single,
}

/// A compiled glob pattern
#[derive(Debug, Clone, PartialEq)]
pub struct Pattern {
    source: String,
    atoms: Vec<Atom>,
}

fn token(input: &str) -> IResult<&str, Token> {
    alt((
        value(Token::Star, char('*')),
        value(Token::Single, char('?')),
        map(preceded(char('\\'), anychar), |c| Token::Literal(c.to_string())),
        map(is_not("*?\\"), |s: &str| Token::Literal(s.to_string())),
    ))(input)
}

fn tokens(input: &str) -> IResult<&str, Vec<Token>> {
    all_consuming(many0(token))(input)
}

impl Pattern {
    /// Compile a pattern
    pub fn parse(pattern: &str) -> Result<Self> {
        let (_, parsed) = tokens(pattern)
            .map_err(|_| Error::Pattern(format!("dangling escape in '{}'", pattern)))?;

        let mut atoms = Vec::with_capacity(pattern.len());
        for token in parsed {
            match token {
                Token::Literal(s) => atoms.extend(s.chars().map(Atom::Char)),
                // Consecutive stars are equivalent to one
                Token::Star if atoms.last() == Some(&Atom::Star) => {}
                Token::Star => atoms.push(Atom::Star),
                Token::Single => atoms.push(Atom::Single),
            }
        }

        Ok(Self {
            source: pattern.to_string(),
            atoms,
        })
    }

    /// Pattern that matches every key
    pub fn any() -> Self {
        Self {
            source: "*".to_string(),
            atoms: vec![Atom::Star],
        }
    }

    /// The pattern text this was compiled from
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Check whether `key` matches the whole pattern
    pub fn matches(&self, key: &str) -> bool {
        let text: Vec<char> = key.chars().collect();
        let (mut p, mut t) = (0usize, 0usize);
        // Position of the last star seen and the text index it was tried at
        let mut backtrack: Option<(usize, usize)> = None;

        while t < text.len() {
            match self.atoms.get(p) {
                Some(Atom::Char(c)) if *c == text[t] => {
                    p += 1;
                    t += 1;
                }
                Some(Atom::Single) => {
                    p += 1;
                    t += 1;
                }
                Some(Atom::Star) => {
                    backtrack = Some((p, t));
                    p += 1;
                }
                _ => match backtrack {
                    Some((star, from)) => {
                        p = star + 1;
                        t = from + 1;
                        backtrack = Some((star, from + 1));
                    }
                    None => return false,
                },
            }
        }

        self.atoms[p..].iter().all(|atom| *atom == Atom::Star)
    }
}

impl FromStr for Pattern {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Pattern::parse(s)
    }
}
