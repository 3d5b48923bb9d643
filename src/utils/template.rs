//! String template rendering.
//!
//! Supports `{{ name }}` substitution, `{% if a %}` / `{% if a or b %}` with an
//! optional `{% else %}`, and `{% for item in list %}` loops. A block tag that
//! sits alone on its line swallows that whole line so YAML indentation in the
//! surrounding text is preserved.

use std::collections::HashMap;

use crate::error::{Error, Result};

pub struct TemplateVars;

impl TemplateVars {
    pub const PROJECT_NAME: &'static str = "project_name";
    pub const IMAGE_TAG: &'static str = "image_tag";
    pub const CLOUD_SQL_CONNECTION_STRING: &'static str = "cloud_sql_connection_string";
    pub const CLOUDSQL_PROXY_IMAGE: &'static str = "cloudsql_proxy_image";
    pub const REPLICAS: &'static str = "replicas";
    pub const DJANGO_SECRETS: &'static str = "django_secrets";
    pub const CLOUDSQL_SECRETS: &'static str = "cloudsql_secrets";
    pub const NAME: &'static str = "name";
    pub const KIND: &'static str = "kind";
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateValue {
    Str(String),
    List(Vec<String>),
}

impl TemplateValue {
    fn is_truthy(&self) -> bool {
        match self {
            TemplateValue::Str(s) => !s.is_empty(),
            TemplateValue::List(items) => !items.is_empty(),
        }
    }
}

/// Variables available to a template.
#[derive(Debug, Clone, Default)]
pub struct Context {
    vars: HashMap<String, TemplateValue>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_str(mut self, key: &str, value: impl Into<String>) -> Self {
        self.insert_str(key, value);
        self
    }

    pub fn with_list(mut self, key: &str, items: Vec<String>) -> Self {
        self.insert_list(key, items);
        self
    }

    pub fn insert_str(&mut self, key: &str, value: impl Into<String>) {
        self.vars
            .insert(key.to_string(), TemplateValue::Str(value.into()));
    }

    pub fn insert_list(&mut self, key: &str, items: Vec<String>) {
        self.vars.insert(key.to_string(), TemplateValue::List(items));
    }

    pub fn get(&self, key: &str) -> Option<&TemplateValue> {
        self.vars.get(key)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Node {
    Text(String),
    Var {
        name: String,
        offset: usize,
    },
    If {
        any_of: Vec<String>,
        then: Vec<Node>,
        otherwise: Vec<Node>,
    },
    For {
        item: String,
        list: String,
        offset: usize,
        body: Vec<Node>,
    },
}

#[derive(Debug)]
enum Token {
    Text(String),
    Var { expr: String, offset: usize },
    Block { expr: String, offset: usize },
}

/// A parsed template, reusable across renders.
#[derive(Debug, Clone)]
pub struct Template {
    nodes: Vec<Node>,
}

impl Template {
    pub fn parse(source: &str) -> Result<Self> {
        let tokens = tokenize(source)?;
        let mut parser = Parser {
            tokens: tokens.into_iter(),
        };
        let (nodes, end) = parser.parse_until(&[])?;
        if let Some((tag, offset)) = end {
            return Err(Error::template_syntax(
                format!("unexpected '{{% {} %}}'", tag),
                offset,
            ));
        }
        Ok(Self { nodes })
    }

    pub fn render(&self, context: &Context) -> Result<String> {
        let mut out = String::new();
        let mut locals = Vec::new();
        render_nodes(&self.nodes, context, &mut locals, &mut out)?;
        Ok(out)
    }
}

/// Parse and render in one step.
pub fn render(source: &str, context: &Context) -> Result<String> {
    Template::parse(source)?.render(context)
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn tokenize(source: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut text = String::new();
    let mut pos = 0;

    while pos < source.len() {
        let remaining = &source[pos..];
        let next_tag = [remaining.find("{{"), remaining.find("{%")]
            .into_iter()
            .flatten()
            .min();

        let Some(rel) = next_tag else {
            text.push_str(remaining);
            break;
        };

        let start = pos + rel;
        text.push_str(&source[pos..start]);

        let is_var = source[start..].starts_with("{{");
        let close = if is_var { "}}" } else { "%}" };
        let inner_start = start + 2;
        let Some(inner_len) = source[inner_start..].find(close) else {
            return Err(Error::template_syntax(
                format!("unterminated tag, expected '{}'", close),
                start,
            ));
        };
        let expr = source[inner_start..inner_start + inner_len].trim().to_string();
        let mut after = inner_start + inner_len + 2;

        if is_var {
            if !text.is_empty() {
                tokens.push(Token::Text(std::mem::take(&mut text)));
            }
            tokens.push(Token::Var {
                expr,
                offset: start,
            });
        } else {
            let line_begin = source[..start].rfind('\n').map(|i| i + 1).unwrap_or(0);
            let indent = &source[line_begin..start];
            let tail = &source[after..];
            let tail_blank = tail.len() - tail.trim_start_matches([' ', '\t']).len();
            let rest = &tail[tail_blank..];
            let newline = if rest.starts_with("\r\n") {
                Some(2)
            } else if rest.starts_with('\n') {
                Some(1)
            } else if rest.is_empty() {
                Some(0)
            } else {
                None
            };

            if let (true, Some(newline_len)) =
                (indent.chars().all(|c| c == ' ' || c == '\t'), newline)
            {
                text.truncate(text.len() - indent.len());
                after += tail_blank + newline_len;
            }

            if !text.is_empty() {
                tokens.push(Token::Text(std::mem::take(&mut text)));
            }
            tokens.push(Token::Block {
                expr,
                offset: start,
            });
        }

        pos = after;
    }

    if !text.is_empty() {
        tokens.push(Token::Text(text));
    }

    Ok(tokens)
}

struct Parser {
    tokens: std::vec::IntoIter<Token>,
}

impl Parser {
    /// Parse nodes until one of `terminators` (or end of input) is reached.
    /// Returns the nodes and the terminating tag with its offset, if any.
    fn parse_until(&mut self, terminators: &[&str]) -> Result<(Vec<Node>, Option<(String, usize)>)> {
        let mut nodes = Vec::new();

        while let Some(token) = self.tokens.next() {
            match token {
                Token::Text(text) => nodes.push(Node::Text(text)),
                Token::Var { expr, offset } => {
                    if !is_identifier(&expr) {
                        return Err(Error::template_syntax(
                            format!("invalid variable name '{}'", expr),
                            offset,
                        ));
                    }
                    nodes.push(Node::Var { name: expr, offset });
                }
                Token::Block { expr, offset } => {
                    let keyword = expr.split_whitespace().next().unwrap_or("");

                    if terminators.contains(&keyword) {
                        if expr != keyword {
                            return Err(Error::template_syntax(
                                format!("'{}' takes no arguments", keyword),
                                offset,
                            ));
                        }
                        return Ok((nodes, Some((keyword.to_string(), offset))));
                    }

                    match keyword {
                        "if" => nodes.push(self.parse_if(&expr, offset)?),
                        "for" => nodes.push(self.parse_for(&expr, offset)?),
                        "else" | "endif" | "endfor" => {
                            return Err(Error::template_syntax(
                                format!("unexpected '{{% {} %}}'", keyword),
                                offset,
                            ))
                        }
                        _ => {
                            return Err(Error::template_syntax(
                                format!("unknown block tag '{}'", expr),
                                offset,
                            ))
                        }
                    }
                }
            }
        }

        if terminators.is_empty() {
            Ok((nodes, None))
        } else {
            Err(Error::template_syntax(
                format!("unclosed block, expected '{}'", terminators.join("' or '")),
                0,
            ))
        }
    }

    fn parse_if(&mut self, expr: &str, offset: usize) -> Result<Node> {
        let condition = expr["if".len()..].trim();
        let any_of: Vec<String> = condition.split(" or ").map(|s| s.trim().to_string()).collect();

        if condition.is_empty() || !any_of.iter().all(|name| is_identifier(name)) {
            return Err(Error::template_syntax(
                format!("invalid if condition '{}'", condition),
                offset,
            ));
        }

        let (then, end) = self.parse_until(&["else", "endif"])?;
        let otherwise = match end {
            Some((tag, _)) if tag == "else" => self.parse_until(&["endif"])?.0,
            _ => Vec::new(),
        };

        Ok(Node::If {
            any_of,
            then,
            otherwise,
        })
    }

    fn parse_for(&mut self, expr: &str, offset: usize) -> Result<Node> {
        let parts: Vec<&str> = expr.split_whitespace().collect();
        let [_, item, "in", list] = parts.as_slice() else {
            return Err(Error::template_syntax(
                format!("expected 'for <item> in <list>', found '{}'", expr),
                offset,
            ));
        };

        if !is_identifier(item) || !is_identifier(list) {
            return Err(Error::template_syntax(
                format!("invalid loop names in '{}'", expr),
                offset,
            ));
        }

        let (body, _) = self.parse_until(&["endfor"])?;

        Ok(Node::For {
            item: item.to_string(),
            list: list.to_string(),
            offset,
            body,
        })
    }
}

fn lookup<'a>(
    name: &str,
    context: &'a Context,
    locals: &'a [(String, String)],
) -> Option<std::borrow::Cow<'a, TemplateValue>> {
    if let Some((_, value)) = locals.iter().rev().find(|(key, _)| key == name) {
        return Some(std::borrow::Cow::Owned(TemplateValue::Str(value.clone())));
    }
    context.get(name).map(std::borrow::Cow::Borrowed)
}

fn render_nodes(
    nodes: &[Node],
    context: &Context,
    locals: &mut Vec<(String, String)>,
    out: &mut String,
) -> Result<()> {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Var { name, offset } => match lookup(name, context, locals).as_deref() {
                Some(TemplateValue::Str(value)) => out.push_str(value),
                Some(TemplateValue::List(_)) => {
                    return Err(Error::template_syntax(
                        format!("'{}' is a list and cannot be substituted directly", name),
                        *offset,
                    ))
                }
                None => return Err(Error::template_undefined_variable(name.clone())),
            },
            Node::If {
                any_of,
                then,
                otherwise,
            } => {
                let scope: &[(String, String)] = locals;
                let truthy = any_of.iter().any(|name| {
                    lookup(name, context, scope).is_some_and(|value| value.is_truthy())
                });
                let branch = if truthy { then } else { otherwise };
                render_nodes(branch, context, locals, out)?;
            }
            Node::For {
                item,
                list,
                offset,
                body,
            } => {
                let items = match lookup(list, context, locals).as_deref() {
                    Some(TemplateValue::List(items)) => items.clone(),
                    Some(TemplateValue::Str(_)) => {
                        return Err(Error::template_syntax(
                            format!("cannot loop over string '{}'", list),
                            *offset,
                        ))
                    }
                    None => Vec::new(),
                };

                for value in items {
                    locals.push((item.clone(), value));
                    let rendered = render_nodes(body, context, locals, out);
                    locals.pop();
                    rendered?;
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_with_and_without_spaces() {
        let ctx = Context::new().with_str("name", "bookshelf");
        assert_eq!(render("{{name}}/{{ name }}", &ctx).unwrap(), "bookshelf/bookshelf");
    }

    #[test]
    fn undefined_variable_fails() {
        let err = render("{{ missing }}", &Context::new()).unwrap_err();
        assert_eq!(err.code.as_str(), "template.undefined_variable");
    }

    #[test]
    fn standalone_block_lines_are_removed() {
        let src = "items:\n  {% for s in secrets %}\n  - {{ s }}\n  {% endfor %}\nend\n";
        let ctx = Context::new().with_list("secrets", vec!["a".into(), "b".into()]);
        assert_eq!(render(src, &ctx).unwrap(), "items:\n  - a\n  - b\nend\n");
    }

    #[test]
    fn inline_block_keeps_surrounding_text() {
        let ctx = Context::new().with_str("tls", "yes");
        assert_eq!(
            render("port: {% if tls %}443{% else %}80{% endif %}\n", &ctx).unwrap(),
            "port: 443\n"
        );
    }

    #[test]
    fn if_or_is_true_when_any_operand_truthy() {
        let src = "{% if a or b %}yes{% else %}no{% endif %}";
        let some = Context::new()
            .with_list("a", Vec::new())
            .with_list("b", vec!["x".into()]);
        let none = Context::new().with_list("a", Vec::new());
        assert_eq!(render(src, &some).unwrap(), "yes");
        assert_eq!(render(src, &none).unwrap(), "no");
    }

    #[test]
    fn undefined_list_loops_zero_times() {
        assert_eq!(render("[{% for s in nothing %}{{ s }}{% endfor %}]", &Context::new()).unwrap(), "[]");
    }

    #[test]
    fn loop_variable_shadows_context() {
        let ctx = Context::new()
            .with_str("s", "outer")
            .with_list("items", vec!["inner".into()]);
        assert_eq!(
            render("{% for s in items %}{{ s }}{% endfor %} {{ s }}", &ctx).unwrap(),
            "inner outer"
        );
    }

    #[test]
    fn nested_blocks_render() {
        let src = "{% for a in outer %}{% if flag %}{% for b in inner %}{{ a }}{{ b }};{% endfor %}{% endif %}{% endfor %}";
        let ctx = Context::new()
            .with_list("outer", vec!["1".into(), "2".into()])
            .with_list("inner", vec!["x".into()])
            .with_str("flag", "on");
        assert_eq!(render(src, &ctx).unwrap(), "1x;2x;");
    }

    #[test]
    fn syntax_errors_are_reported() {
        let ctx = Context::new().with_list("l", vec!["a".into()]);
        for src in [
            "{{ unterminated",
            "{% if x %}never closed",
            "{% endif %}",
            "{% for x of l %}{% endfor %}",
            "{% include other %}",
            "{{ not a name }}",
            "{% for x in l %}{% endif %}",
        ] {
            let err = render(src, &ctx).unwrap_err();
            assert_eq!(err.code.as_str(), "template.syntax", "source: {}", src);
        }
    }

    #[test]
    fn list_substitution_and_string_loop_fail() {
        let ctx = Context::new()
            .with_list("l", vec!["a".into()])
            .with_str("s", "abc");
        assert!(render("{{ l }}", &ctx).is_err());
        assert!(render("{% for c in s %}{{ c }}{% endfor %}", &ctx).is_err());
    }
}
