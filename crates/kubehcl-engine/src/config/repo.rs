//! `repo` blocks of the repository configuration file

use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use kubehcl_core::{Diagnostics, SourceRange, Value};
use kubehcl_syntax::{Attribute, Block, parse_file};
use serde::{Deserialize, Serialize};

use super::{allowed_attributes, single_label};

/// Seconds allowed for a repository request when `Timeout` is absent
pub const DEFAULT_REPO_TIMEOUT: u64 = 120;

const REPO_ATTRIBUTES: &[&str] = &[
    "Name",
    "Url",
    "Protocol",
    "Username",
    "Password",
    "Timeout",
    "CertFile",
    "KeyFile",
    "CaFile",
    "InsecureSkipTLSverify",
    "PlainHttp",
    "RepoFile",
    "RepoCache",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Https,
    Oci,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
            Protocol::Oci => "oci",
        }
    }

    /// Whether modules are located through an `index.yaml`
    pub fn uses_index(&self) -> bool {
        matches!(self, Protocol::Http | Protocol::Https)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "http" => Ok(Protocol::Http),
            "https" => Ok(Protocol::Https),
            "oci" => Ok(Protocol::Oci),
            other => Err(format!(
                "Protocol {} is invalid please use http, https or oci",
                other
            )),
        }
    }
}

/// A registered module repository
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepoRecord {
    pub name: String,
    pub url: String,
    pub protocol: Protocol,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Seconds
    pub timeout: u64,
    pub cert_file: Option<String>,
    pub key_file: Option<String>,
    pub ca_file: Option<String>,
    pub insecure_skip_tls_verify: bool,
    pub plain_http: bool,
    pub repo_file: Option<String>,
    pub repo_cache: Option<String>,
    #[serde(skip)]
    pub decl_range: SourceRange,
}

impl RepoRecord {
    pub fn new(name: impl Into<String>, url: impl Into<String>, protocol: Protocol) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            protocol,
            username: None,
            password: None,
            timeout: DEFAULT_REPO_TIMEOUT,
            cert_file: None,
            key_file: None,
            ca_file: None,
            insecure_skip_tls_verify: false,
            plain_http: false,
            repo_file: None,
            repo_cache: None,
            decl_range: SourceRange::default(),
        }
    }

    /// Basic auth credentials, only when both halves are set
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(u), Some(p)) if !u.is_empty() && !p.is_empty() => Some((u, p)),
            _ => None,
        }
    }

    /// Render as a `repo` block for the repository file
    pub fn render(&self) -> String {
        let mut fields: Vec<(&str, String)> = vec![
            ("Name", quote(&self.name)),
            ("Url", quote(&self.url)),
            ("Protocol", quote(self.protocol.as_str())),
        ];
        let optional = [
            ("Username", &self.username),
            ("Password", &self.password),
            ("CertFile", &self.cert_file),
            ("KeyFile", &self.key_file),
            ("CaFile", &self.ca_file),
            ("RepoFile", &self.repo_file),
            ("RepoCache", &self.repo_cache),
        ];
        for (key, value) in optional {
            if let Some(v) = value {
                fields.push((key, quote(v)));
            }
        }
        if self.timeout != DEFAULT_REPO_TIMEOUT {
            fields.push(("Timeout", self.timeout.to_string()));
        }
        if self.insecure_skip_tls_verify {
            fields.push(("InsecureSkipTLSverify", "true".to_string()));
        }
        if self.plain_http {
            fields.push(("PlainHttp", "true".to_string()));
        }

        let width = fields.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
        let mut out = format!("repo {} {{\n", quote(&self.name));
        for (key, value) in fields {
            out.push_str(&format!("  {:<width$} = {}\n", key, value, width = width));
        }
        out.push_str("}\n");
        out
    }
}

fn quote(s: &str) -> String {
    let escaped = serde_json::to_string(s).unwrap_or_else(|_| format!("{:?}", s));
    escaped.replace("${", "$${").replace("%{", "%%{")
}

/// Parse a repository file, keyed by repository name in file order
pub fn decode_repo_file(
    src: &str,
    filename: &str,
    diags: &mut Diagnostics,
) -> IndexMap<String, RepoRecord> {
    let (body, parse_diags) = parse_file(src, filename);
    diags.append(parse_diags);

    for attr in &body.attributes {
        diags.error(
            "Unsupported argument",
            format!("An argument named {:?} is not expected here.", attr.name),
            &attr.name_range,
        );
    }

    let mut repos = IndexMap::new();
    for block in &body.blocks {
        if block.kind != "repo" {
            diags.error(
                "Unsupported block type",
                format!("Blocks of type {:?} are not expected here.", block.kind),
                &block.type_range,
            );
            continue;
        }
        let Some(record) = decode_repo_block(block, diags) else {
            continue;
        };
        if repos.contains_key(&record.name) {
            diags.error(
                "Repos must have different names",
                format!("Two repositories have the same name: {}", record.name),
                &block.header_range(),
            );
            continue;
        }
        repos.insert(record.name.clone(), record);
    }
    repos
}

fn decode_repo_block(block: &Block, diags: &mut Diagnostics) -> Option<RepoRecord> {
    let name = single_label(block, diags)?;
    allowed_attributes(&block.body, REPO_ATTRIBUTES, diags);
    let decl_range = block.header_range();
    let before = diags.errors().count();

    let body = &block.body;
    let string_attr = |key: &str, diags: &mut Diagnostics| -> Option<String> {
        let attr = body.attribute(key)?;
        match attr.expr.static_value() {
            Some(Value::String(s)) => Some(s),
            _ => {
                type_error(attr, "string", diags);
                None
            }
        }
    };
    let bool_attr = |key: &str, diags: &mut Diagnostics| -> bool {
        let Some(attr) = body.attribute(key) else {
            return false;
        };
        match attr.expr.static_value() {
            Some(Value::Bool(b)) => b,
            _ => {
                type_error(attr, "bool", diags);
                false
            }
        }
    };

    let Some(url) = string_attr("Url", diags) else {
        if body.attribute("Url").is_none() {
            diags.error(
                "URL must be included in repo block",
                format!("URL is not included in repo block {}", name),
                &decl_range,
            );
        }
        return None;
    };

    let protocol = match string_attr("Protocol", diags) {
        Some(p) => match p.parse::<Protocol>() {
            Ok(p) => p,
            Err(detail) => {
                diags.error("Protocol is invalid", detail, &decl_range);
                return None;
            }
        },
        None => {
            if body.attribute("Protocol").is_none() {
                diags.error(
                    "Missing required argument",
                    "The argument \"Protocol\" is required, but no definition was found.",
                    &decl_range,
                );
            }
            return None;
        }
    };

    let timeout = match body.attribute("Timeout") {
        None => DEFAULT_REPO_TIMEOUT,
        Some(attr) => match attr.expr.static_value().and_then(|v| v.as_f64()) {
            Some(n) if n >= 0.0 && n.fract() == 0.0 => n as u64,
            _ => {
                type_error(attr, "whole number", diags);
                DEFAULT_REPO_TIMEOUT
            }
        },
    };

    let record = RepoRecord {
        name: name.to_string(),
        url,
        protocol,
        username: string_attr("Username", diags),
        password: string_attr("Password", diags),
        timeout,
        cert_file: string_attr("CertFile", diags),
        key_file: string_attr("KeyFile", diags),
        ca_file: string_attr("CaFile", diags),
        insecure_skip_tls_verify: bool_attr("InsecureSkipTLSverify", diags),
        plain_http: bool_attr("PlainHttp", diags),
        repo_file: string_attr("RepoFile", diags),
        repo_cache: string_attr("RepoCache", diags),
        decl_range,
    };
    (diags.errors().count() == before).then_some(record)
}

fn type_error(attr: &Attribute, expected: &str, diags: &mut Diagnostics) {
    diags.error(
        "Incorrect attribute value type",
        format!("Inappropriate value for attribute {:?}: {} required.", attr.name, expected),
        &attr.expr.range,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(src: &str) -> (IndexMap<String, RepoRecord>, Diagnostics) {
        let mut diags = Diagnostics::new();
        let repos = decode_repo_file(src, "repositories.hcl", &mut diags);
        (repos, diags)
    }

    #[test]
    fn test_decode_repo_file() {
        let (repos, diags) = decode(
            r#"
repo "stable" {
  Name     = "stable"
  Url      = "charts.example.com/kubehcl"
  Protocol = "https"
  Username = "me"
  Password = "secret"
  Timeout  = 30
}

repo "local" {
  Url       = "localhost:5000/modules"
  Protocol  = "oci"
  PlainHttp = true
}
"#,
        );
        assert!(!diags.has_errors(), "{:?}", diags);
        let names: Vec<_> = repos.keys().cloned().collect();
        assert_eq!(names, vec!["stable", "local"]);
        let stable = &repos["stable"];
        assert_eq!(stable.protocol, Protocol::Https);
        assert_eq!(stable.timeout, 30);
        assert_eq!(stable.credentials(), Some(("me", "secret")));
        let local = &repos["local"];
        assert!(local.plain_http);
        assert_eq!(local.timeout, DEFAULT_REPO_TIMEOUT);
        assert_eq!(local.credentials(), None);
    }

    #[test]
    fn test_invalid_protocol() {
        let (repos, diags) = decode("repo \"x\" {\n  Url = \"a\"\n  Protocol = \"ftp\"\n}\n");
        assert!(repos.is_empty());
        let err = diags.errors().next().unwrap();
        assert_eq!(err.summary, "Protocol is invalid");
        assert_eq!(err.detail, "Protocol ftp is invalid please use http, https or oci");
    }

    #[test]
    fn test_missing_url_and_duplicates() {
        let (_, diags) = decode("repo \"x\" {\n  Protocol = \"oci\"\n}\n");
        assert_eq!(
            diags.errors().next().unwrap().summary,
            "URL must be included in repo block"
        );

        let src = "repo \"x\" {\n  Url = \"a\"\n  Protocol = \"oci\"\n}\nrepo \"x\" {\n  Url = \"b\"\n  Protocol = \"oci\"\n}\n";
        let (repos, diags) = decode(src);
        assert_eq!(repos.len(), 1);
        assert_eq!(
            diags.errors().next().unwrap().summary,
            "Repos must have different names"
        );
    }

    #[test]
    fn test_render_round_trips() {
        let mut record = RepoRecord::new("local", "localhost:5000/modules", Protocol::Oci);
        record.plain_http = true;
        record.timeout = 10;
        let rendered = record.render();
        assert!(rendered.starts_with("repo \"local\" {\n"));

        let (repos, diags) = decode(&rendered);
        assert!(!diags.has_errors(), "{:?}", diags);
        let decoded = &repos["local"];
        assert_eq!(decoded.url, record.url);
        assert_eq!(decoded.timeout, 10);
        assert!(decoded.plain_http);
    }
}
