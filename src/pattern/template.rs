// src/pattern/template.rs

//! `{name}` placeholder templates.
//!
//! Templates are parsed once at registration and rendered per instance.
//! `{{` and `}}` produce literal braces; `{name!raw}` skips shell escaping.

use std::fmt;

use crate::config::params::Parameters;
use crate::errors::{PipedagError, Result};
use crate::pattern::bindings::{BindingValue, Bindings};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder { name: String, raw: bool },
}

/// A parsed template string.
#[derive(Clone, PartialEq, Eq)]
pub struct Template {
    source: String,
    segments: Vec<Segment>,
}

impl fmt::Debug for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Template").field(&self.source).finish()
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl Template {
    pub fn parse(source: &str) -> Result<Self> {
        let invalid = |message: &str| PipedagError::InvalidPattern {
            pattern: source.to_string(),
            message: message.to_string(),
        };

        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = source.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '}' => return Err(invalid("unmatched '}'")),
                '{' => {
                    let mut inner = String::new();
                    let mut closed = false;
                    for c in chars.by_ref() {
                        if c == '}' {
                            closed = true;
                            break;
                        }
                        if c == '{' {
                            return Err(invalid("nested '{' in placeholder"));
                        }
                        inner.push(c);
                    }
                    if !closed {
                        return Err(invalid("unclosed '{'"));
                    }
                    let (name, raw) = match inner.strip_suffix("!raw") {
                        Some(n) => (n.trim(), true),
                        None => (inner.trim(), false),
                    };
                    if name.is_empty() {
                        return Err(invalid("empty placeholder"));
                    }
                    if !name
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-')
                    {
                        return Err(invalid(&format!("invalid placeholder name '{name}'")));
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Placeholder {
                        name: name.to_string(),
                        raw,
                    });
                }
                other => literal.push(other),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// True if the template contains glob metacharacters outside placeholders.
    pub fn is_glob(&self) -> bool {
        self.segments.iter().any(|s| match s {
            Segment::Literal(l) => l.contains(['*', '?', '[']),
            Segment::Placeholder { .. } => false,
        })
    }

    /// Render without escaping; lists are joined with a space.
    pub fn render(&self, scope: &Scope<'_>) -> Result<String> {
        let mut out = String::new();
        for seg in &self.segments {
            match seg {
                Segment::Literal(l) => out.push_str(l),
                Segment::Placeholder { name, .. } => {
                    out.push_str(&self.lookup(scope, name)?.joined());
                }
            }
        }
        Ok(out)
    }

    /// Render for `<shell> -c`: every substituted word is single-quote escaped
    /// unless the placeholder is marked `!raw`.
    pub fn render_shell(&self, scope: &Scope<'_>) -> Result<String> {
        let mut out = String::new();
        for seg in &self.segments {
            match seg {
                Segment::Literal(l) => out.push_str(l),
                Segment::Placeholder { name, raw } => {
                    let value = self.lookup(scope, name)?;
                    if *raw {
                        out.push_str(&value.joined());
                    } else {
                        let words: Vec<String> =
                            value.words().into_iter().map(shell_escape).collect();
                        out.push_str(&words.join(" "));
                    }
                }
            }
        }
        Ok(out)
    }

    /// Render one argv element. A template that is exactly one placeholder
    /// bound to a list expands to several elements.
    pub fn render_argv(&self, scope: &Scope<'_>) -> Result<Vec<String>> {
        if let [Segment::Placeholder { name, .. }] = self.segments.as_slice() {
            let value = self.lookup(scope, name)?;
            return Ok(value.words().into_iter().map(str::to_string).collect());
        }
        Ok(vec![self.render(scope)?])
    }

    fn lookup<'s>(&self, scope: &'s Scope<'_>, name: &str) -> Result<&'s BindingValue> {
        scope
            .get(name)
            .ok_or_else(|| PipedagError::UnresolvedParameter {
                name: name.to_string(),
                context: format!("'{}'", self.source),
            })
    }
}

/// Something placeholders can be looked up in.
pub trait Lookup {
    fn lookup(&self, name: &str) -> Option<&BindingValue>;
}

impl Lookup for Bindings {
    fn lookup(&self, name: &str) -> Option<&BindingValue> {
        self.get(name)
    }
}

impl Lookup for Parameters {
    fn lookup(&self, name: &str) -> Option<&BindingValue> {
        self.get(name)
    }
}

/// Layered lookup: the first layer that knows a name wins.
#[derive(Default)]
pub struct Scope<'a> {
    layers: Vec<&'a dyn Lookup>,
}

impl<'a> Scope<'a> {
    pub fn new() -> Self {
        Self { layers: Vec::new() }
    }

    pub fn with(mut self, layer: &'a dyn Lookup) -> Self {
        self.layers.push(layer);
        self
    }

    pub fn get(&self, name: &str) -> Option<&BindingValue> {
        self.layers.iter().find_map(|l| l.lookup(name))
    }
}

/// Quote a word for POSIX `sh` if it contains anything outside a safe set.
pub fn shell_escape(word: &str) -> String {
    let safe = !word.is_empty()
        && word.chars().all(|c| {
            c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/' | '=' | ':' | ',' | '+' | '@' | '%')
        });
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', "'\\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bindings() -> Bindings {
        let mut b = Bindings::new();
        b.insert("infile", "a b.fastq.gz");
        b.insert("outfile", "a.trim.fastq.gz");
        b.insert("infiles", vec!["x.bam".to_string(), "y z.bam".to_string()]);
        b.insert("1", "a");
        b
    }

    #[test]
    fn shell_rendering_escapes_values_but_not_literals() {
        let t = Template::parse("cutadapt -o {outfile} {infile} > {1}.log").unwrap();
        let b = bindings();
        let rendered = t.render_shell(&Scope::new().with(&b)).unwrap();
        assert_eq!(rendered, "cutadapt -o a.trim.fastq.gz 'a b.fastq.gz' > a.log");
    }

    #[test]
    fn raw_placeholders_are_inserted_verbatim() {
        let mut params = Parameters::new();
        params.insert("star_extra", "--a 1 --b");
        let t = Template::parse("STAR {star_extra!raw}").unwrap();
        let rendered = t.render_shell(&Scope::new().with(&params)).unwrap();
        assert_eq!(rendered, "STAR --a 1 --b");
    }

    #[test]
    fn list_expands_to_several_argv_elements() {
        let t = Template::parse("{infiles}").unwrap();
        let b = bindings();
        let argv = t.render_argv(&Scope::new().with(&b)).unwrap();
        assert_eq!(argv, vec!["x.bam".to_string(), "y z.bam".to_string()]);

        let t = Template::parse("--in={infiles}").unwrap();
        let argv = t.render_argv(&Scope::new().with(&b)).unwrap();
        assert_eq!(argv, vec!["--in=x.bam y z.bam".to_string()]);
    }

    #[test]
    fn first_layer_wins() {
        let mut task = Parameters::new();
        task.insert("threads", "2");
        let mut global = Parameters::new();
        global.insert("threads", "16");
        global.insert("genome", "hg38");
        let scope = Scope::new().with(&task).with(&global);
        let t = Template::parse("-p {threads} -g {genome}").unwrap();
        assert_eq!(t.render(&scope).unwrap(), "-p 2 -g hg38");
    }

    #[test]
    fn unresolved_placeholder_names_itself() {
        let t = Template::parse("run {missing}").unwrap();
        let err = t.render(&Scope::new()).unwrap_err();
        assert!(matches!(err, PipedagError::UnresolvedParameter { name, .. } if name == "missing"));
    }

    #[test]
    fn escaped_braces_and_parse_errors() {
        let t = Template::parse("awk '{{print $1}}' {1}").unwrap();
        let b = bindings();
        assert_eq!(t.render(&Scope::new().with(&b)).unwrap(), "awk '{print $1}' a");
        assert!(Template::parse("bad {unclosed").is_err());
        assert!(Template::parse("bad }").is_err());
        assert!(Template::parse("bad {}").is_err());
    }

    #[test]
    fn shell_escape_quotes_only_when_needed() {
        assert_eq!(shell_escape("plain/path-1.txt"), "plain/path-1.txt");
        assert_eq!(shell_escape(""), "''");
        assert_eq!(shell_escape("it's"), "'it'\\''s'");
    }
}
