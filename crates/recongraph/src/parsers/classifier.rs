//! Keyword classifier mapping URL parameter names to likely attack classes.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum AttackType {
    #[serde(rename = "LFI")]
    Lfi,
    #[serde(rename = "XSS")]
    Xss,
    #[serde(rename = "SQLi")]
    Sqli,
    #[serde(rename = "SSRF")]
    Ssrf,
    #[serde(rename = "Open Redirect")]
    OpenRedirect,
    #[serde(rename = "RCE")]
    Rce,
    #[serde(rename = "IDOR")]
    Idor,
}

impl AttackType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttackType::Lfi => "LFI",
            AttackType::Xss => "XSS",
            AttackType::Sqli => "SQLi",
            AttackType::Ssrf => "SSRF",
            AttackType::OpenRedirect => "Open Redirect",
            AttackType::Rce => "RCE",
            AttackType::Idor => "IDOR",
        }
    }
}

impl std::fmt::Display for AttackType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

const SIGNATURES: &[(AttackType, &[&str])] = &[
    (
        AttackType::Lfi,
        &[
            "file", "path", "page", "include", "dir", "document", "folder", "root", "pg", "view",
            "content", "download", "template", "load", "read", "retrieve", "cat", "type", "conf",
            "log", "filename", "filepath", "resource", "loc", "location",
        ],
    ),
    (
        AttackType::Xss,
        &[
            "q", "search", "query", "keyword", "name", "email", "comment", "msg", "message",
            "text", "value", "input", "callback", "data", "body", "title", "error", "preview",
            "html", "content", "description", "feedback", "review", "bio", "note",
        ],
    ),
    (
        AttackType::Sqli,
        &[
            "id", "user", "order", "sort", "column", "table", "select", "where", "limit",
            "offset", "group", "having", "union", "category", "item", "product", "price", "date",
            "from", "to", "filter", "report", "role", "update", "result", "num",
        ],
    ),
    (
        AttackType::Ssrf,
        &[
            "url", "link", "src", "source", "dest", "uri", "domain", "feed", "host", "site", "val",
            "proxy", "api", "endpoint", "fetch", "request", "imageurl", "imgurl", "webhook",
        ],
    ),
    (
        AttackType::OpenRedirect,
        &[
            "redirect", "next", "return", "goto", "destination", "continue", "target", "redir",
            "returnto", "returnurl", "forward", "out", "ref", "location", "checkout_url",
            "return_path", "redirect_uri", "redirect_url",
        ],
    ),
    (
        AttackType::Rce,
        &[
            "cmd", "exec", "command", "run", "ping", "jump", "code", "reg", "do", "func", "arg",
            "option", "process", "step", "function", "req", "feature", "exe", "module", "payload",
            "action", "execute",
        ],
    ),
    (
        AttackType::Idor,
        &[
            "id", "user_id", "uid", "account", "profile", "order_id", "doc", "key", "group",
            "role", "no", "number", "token", "session", "invoice", "receipt", "file_id", "pid",
            "customer_id", "member_id", "record",
        ],
    ),
];

/// Returns every attack class whose keyword set contains the parameter name
/// (case-insensitive, trimmed), in a fixed order.
pub fn classify_parameter(name: &str) -> Vec<AttackType> {
    let name = name.trim().to_lowercase();
    SIGNATURES
        .iter()
        .filter(|(_, keywords)| keywords.contains(&name.as_str()))
        .map(|(attack, _)| *attack)
        .collect()
}
