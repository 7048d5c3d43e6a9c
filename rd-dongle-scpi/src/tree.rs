//! SCPI-99 header matching.
//!
//! Command patterns are written the way the standard prints them:
//! mnemonics with an uppercase short form and a lowercase tail
//! (`VOLTage`), optional nodes in brackets (`[SOURce]`, `[:LEVel]`) and a
//! trailing `?` for queries. Input headers match a pattern when every
//! token equals either the short or the long form of its node,
//! case-insensitively, with optional nodes free to be absent.

/// One node of a compiled pattern.
#[derive(Debug, Clone)]
pub struct Node {
    long: String,
    short: String,
    optional: bool,
}

impl Node {
    fn matches(&self, token: &str) -> bool {
        token.eq_ignore_ascii_case(&self.long) || token.eq_ignore_ascii_case(&self.short)
    }
}

/// A compiled header pattern.
#[derive(Debug, Clone)]
pub struct Pattern {
    nodes: Vec<Node>,
    pub query: bool,
}

impl Pattern {
    /// Compile a pattern like `[SOURce]:VOLTage[:LEVel]?`.
    pub fn compile(pattern: &str) -> Self {
        let (body, query) = match pattern.strip_suffix('?') {
            Some(body) => (body, true),
            None => (pattern, false),
        };
        // Normalize "NODE[:CHILD]" to "NODE:[CHILD]" so a plain split on
        // ':' yields one token per node.
        let normalized = body.replace("[:", ":[");
        let nodes = normalized
            .split(':')
            .filter(|tok| !tok.is_empty())
            .map(|tok| {
                let optional = tok.starts_with('[');
                let mnemonic = tok.trim_matches(|c| c == '[' || c == ']');
                let short: String = mnemonic
                    .chars()
                    .take_while(|c| !c.is_ascii_lowercase())
                    .collect();
                Node {
                    long: mnemonic.to_ascii_uppercase(),
                    short,
                    optional,
                }
            })
            .collect();
        Self { nodes, query }
    }

    /// Match an input header (without the query marker) against this
    /// pattern.
    pub fn matches(&self, header: &str) -> bool {
        let tokens: Vec<&str> = header
            .trim_start_matches(':')
            .split(':')
            .filter(|tok| !tok.is_empty())
            .collect();
        if tokens.is_empty() {
            return false;
        }
        match_nodes(&self.nodes, &tokens)
    }
}

fn match_nodes(nodes: &[Node], tokens: &[&str]) -> bool {
    match (nodes.first(), tokens.first()) {
        (None, None) => true,
        (None, Some(_)) => false,
        (Some(node), None) => node.optional && match_nodes(&nodes[1..], tokens),
        (Some(node), Some(token)) => {
            if node.matches(token) && match_nodes(&nodes[1..], &tokens[1..]) {
                return true;
            }
            node.optional && match_nodes(&nodes[1..], tokens)
        }
    }
}
