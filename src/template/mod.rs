//! Placeholder expansion for build-step command strings.
//!
//! Build steps in the manifest are shell command strings carrying tokens of
//! the form `${NAME}` from a closed set: `${PREFIX}`, `${CC}`, `${CXX}`,
//! `${JOBS}`, `${RPATH}`, and the parameterised `${DEP:<package>}` which
//! expands to an interdependency's install prefix.
//!
//! Each step is parsed into a [`CommandTemplate`] before anything runs, so a
//! token outside the recognised set fails the build up front instead of
//! leaking into the shell. Plain `$VAR` shell references (no braces) are not
//! template syntax and pass through untouched.

use std::collections::BTreeMap;
use std::thread;

use thiserror::Error;

/// Errors from template parsing and rendering.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    /// `${...}` named something outside the recognised token set.
    #[error("unknown placeholder '${{{0}}}' in build step")]
    UnknownToken(String),

    /// A `${` with no closing `}`.
    #[error("unterminated placeholder in build step: '{0}'")]
    Unterminated(String),

    /// `${DEP:x}` where `x` is not a declared interdependency of the
    /// package being built.
    #[error("'${{DEP:{0}}}' does not name a declared interdependency")]
    UndeclaredDependency(String),
}

/// Recognised placeholder tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// The package's install prefix.
    Prefix,
    /// C compiler executable.
    Cc,
    /// C++ compiler executable.
    Cxx,
    /// Parallel job count for the native build tool.
    Jobs,
    /// Runtime library path (deployment location).
    Rpath,
    /// Install prefix of the named interdependency.
    DepRoot(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Token(Token),
}

/// A build step parsed into literal text and token slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    segments: Vec<Segment>,
}

impl CommandTemplate {
    /// Parse one build-step string.
    ///
    /// Fails on any `${...}` outside the token set; `${` is reserved syntax
    /// in build steps.
    pub fn parse(step: &str) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut rest = step;

        while let Some(start) = rest.find("${") {
            literal.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let end = after
                .find('}')
                .ok_or_else(|| TemplateError::Unterminated(step.to_string()))?;
            let name = &after[..end];

            if !literal.is_empty() {
                segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }
            segments.push(Segment::Token(Self::token(name)?));
            rest = &after[end + 1..];
        }

        literal.push_str(rest);
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self { segments })
    }

    fn token(name: &str) -> Result<Token, TemplateError> {
        if let Some(dep) = name.strip_prefix("DEP:") {
            return Ok(Token::DepRoot(dep.to_string()));
        }
        match name {
            "PREFIX" => Ok(Token::Prefix),
            "CC" => Ok(Token::Cc),
            "CXX" => Ok(Token::Cxx),
            "JOBS" => Ok(Token::Jobs),
            "RPATH" => Ok(Token::Rpath),
            other => Err(TemplateError::UnknownToken(other.to_string())),
        }
    }

    /// Substitute every token slot once, in order, over the whole step.
    pub fn render(&self, values: &TokenValues) -> Result<String, TemplateError> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Token(Token::Prefix) => out.push_str(&values.prefix),
                Segment::Token(Token::Cc) => out.push_str(&values.cc),
                Segment::Token(Token::Cxx) => out.push_str(&values.cxx),
                Segment::Token(Token::Jobs) => out.push_str(&values.jobs.to_string()),
                Segment::Token(Token::Rpath) => out.push_str(&values.rpath),
                Segment::Token(Token::DepRoot(name)) => {
                    let root = values
                        .dep_roots
                        .get(name)
                        .ok_or_else(|| TemplateError::UndeclaredDependency(name.clone()))?;
                    out.push_str(root);
                }
            }
        }
        Ok(out)
    }
}

/// Parse and render one step in a single call.
pub fn expand(step: &str, values: &TokenValues) -> Result<String, TemplateError> {
    CommandTemplate::parse(step)?.render(values)
}

/// Concrete values for the token set, computed per target package.
#[derive(Debug, Clone)]
pub struct TokenValues {
    pub prefix: String,
    pub cc: String,
    pub cxx: String,
    pub jobs: usize,
    pub rpath: String,
    dep_roots: BTreeMap<String, String>,
}

impl TokenValues {
    pub fn new(prefix: String, cc: String, cxx: String, jobs: usize, rpath: String) -> Self {
        Self {
            prefix,
            cc,
            cxx,
            jobs,
            rpath,
            dep_roots: BTreeMap::new(),
        }
    }

    /// Register the install prefix of a declared interdependency.
    pub fn with_dep_root(mut self, name: impl Into<String>, root: impl Into<String>) -> Self {
        self.dep_roots.insert(name.into(), root.into());
        self
    }
}

/// Job count handed to native build tools: one core is left for the rest of
/// the machine, floor of 1.
pub fn job_count() -> usize {
    let cpus = thread::available_parallelism().map(usize::from).unwrap_or(1);
    cpus.saturating_sub(1).max(1)
}
