//! # mender-ref-linux
//!
//! Linux adapters for the mender session loop.
//!
//! - [`collector`] : `LinuxCollector`, host metrics from `sysinfo` plus a
//!   table of read-only shell probes
//! - [`context`] : discovery of the hostname, user name and home directory
//!   the sanitizer masks
//! - [`sources`] : Fedora Bugzilla, Ask Fedora, Arch Wiki, GitHub issues and
//!   DuckDuckGo as `KnowledgeSource`s, in priority order
//!
//! Nothing here runs a model-proposed command. Shell probes are fixed
//! strings from the probe table and never pass through the command policy.

pub mod collector;
pub mod context;
pub mod sources;

pub use collector::{LinuxCollector, ShellProbe, PROBES};
pub use context::discover_sensitive_context;
pub use sources::{default_sources, http_client, SourceKind, WebSource};

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;

    use mender_contracts::{
        error::MenderError,
        execution::{ExecutionResult, PreparedCommand},
        fact::FactValue,
        session::ModuleFilter,
    };
    use mender_core::traits::{FactCollector, ProcessRunner, RunLimits};

    use crate::collector::{parse_failed_units, parse_journal_usage};
    use crate::context::context_from;
    use crate::{LinuxCollector, SourceKind};

    fn result(exit: Option<i32>, stdout: &str) -> ExecutionResult {
        ExecutionResult {
            command: "probe".to_string(),
            exit_status: exit,
            stdout: stdout.to_string(),
            stderr: String::new(),
            duration: Duration::from_millis(3),
            elevated: false,
            timed_out: false,
            started_at: Utc::now(),
        }
    }

    /// Answers probes from a command → (exit, stdout) table; unknown
    /// commands exit 127.
    struct CannedRunner {
        answers: HashMap<&'static str, (i32, &'static str)>,
        seen: Mutex<Vec<String>>,
    }

    impl CannedRunner {
        fn new(answers: &[(&'static str, i32, &'static str)]) -> Arc<Self> {
            Arc::new(Self {
                answers: answers.iter().map(|(c, e, o)| (*c, (*e, *o))).collect(),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn seen(&self) -> Vec<String> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ProcessRunner for CannedRunner {
        async fn run(&self, command: &PreparedCommand, _limits: RunLimits<'_>) -> ExecutionResult {
            self.seen.lock().unwrap().push(command.command.clone());
            let (exit, stdout) = self
                .answers
                .get(command.command.as_str())
                .copied()
                .unwrap_or((127, ""));
            ExecutionResult {
                command: command.command.clone(),
                ..result(Some(exit), stdout)
            }
        }
    }

    // ── Probe parsers ─────────────────────────────────────────────────────────

    /// Journal sizes in any systemd unit become megabytes.
    #[test]
    fn test_journal_usage_units() {
        let line = |size: &str| {
            result(
                Some(0),
                &format!("Archived and active journals take up {size} in the file system.\n"),
            )
        };
        assert_eq!(parse_journal_usage(&line("1.5G")), Some(FactValue::Number(1536.0)));
        assert_eq!(parse_journal_usage(&line("200.0M")), Some(FactValue::Number(200.0)));
        assert_eq!(parse_journal_usage(&line("512K")), Some(FactValue::Number(0.5)));
        assert_eq!(parse_journal_usage(&line("12Q")), None);
        assert_eq!(parse_journal_usage(&result(Some(1), "")), None);
    }

    /// Failed units are the first column of each line; none is an empty
    /// string, which the inference rule ignores.
    #[test]
    fn test_failed_units_listing() {
        let listing = "cups.service loaded failed failed CUPS Scheduler\n\
                       nfs-mount.service loaded failed failed NFS\n";
        assert_eq!(
            parse_failed_units(&result(Some(0), listing)),
            Some(FactValue::Text("cups.service, nfs-mount.service".to_string()))
        );
        assert_eq!(
            parse_failed_units(&result(Some(0), "")),
            Some(FactValue::Text(String::new()))
        );
        assert_eq!(parse_failed_units(&result(None, "")), None);
    }

    // ── Collector ─────────────────────────────────────────────────────────────

    /// Probe output lands under the right module and fact names.
    #[tokio::test]
    async fn test_collector_maps_probe_output() {
        let runner = CannedRunner::new(&[
            ("systemctl --user is-active pipewire.service", 3, "inactive\n"),
            ("pactl list short sinks", 0, "47\talsa_output.pci\tPipeWire\ts32le 2ch 48000Hz\tSUSPENDED\n"),
            ("ip route show default", 0, "default via 192.168.1.1 dev wlp2s0\n"),
            ("getent hosts fedoraproject.org", 2, ""),
            ("find ~/.cache/thumbnails/fail -type f 2>/dev/null | wc -l", 0, "14\n"),
        ]);
        let collector = LinuxCollector::with_runner(runner.clone()).without_host_metrics();

        let facts = collector.collect(&ModuleFilter::All).await.unwrap();

        assert_eq!(facts.get("audio", "pipewire_active"), Some(&FactValue::Flag(false)));
        assert_eq!(facts.get("audio", "sink_count"), Some(&FactValue::Number(1.0)));
        assert_eq!(facts.get("network", "default_route"), Some(&FactValue::Flag(true)));
        assert_eq!(facts.get("network", "dns_ok"), Some(&FactValue::Flag(false)));
        assert_eq!(facts.get("thumbnails", "fail_count"), Some(&FactValue::Number(14.0)));
        // journalctl is unknown to the runner and exits 127.
        assert_eq!(facts.get("logs", "journal_size_mb"), None);
        assert_eq!(runner.seen().len(), crate::PROBES.len());
    }

    /// Modules outside the filter are never probed.
    #[tokio::test]
    async fn test_collector_respects_module_filter() {
        let runner = CannedRunner::new(&[("pactl list short sinks", 0, "")]);
        let collector = LinuxCollector::with_runner(runner.clone()).without_host_metrics();

        let facts = collector.collect(&ModuleFilter::parse("audio")).await.unwrap();

        assert!(runner.seen().iter().all(|c| c.contains("pipewire") || c.contains("pactl")));
        assert_eq!(runner.seen().len(), 2);
        assert_eq!(facts.get("audio", "sink_count"), Some(&FactValue::Number(0.0)));
        assert!(facts.module("network").is_none());
    }

    // ── Sensitive context ─────────────────────────────────────────────────────

    /// USER wins over LOGNAME; placeholder hostnames and a bare `/` home are
    /// not worth masking.
    #[test]
    fn test_sensitive_context_discovery() {
        let env = |key: &str| match key {
            "USER" => Some("alice".to_string()),
            "LOGNAME" => Some("root".to_string()),
            "HOME" => Some("/home/alice".to_string()),
            _ => None,
        };
        let context = context_from(Some("alice-laptop".to_string()), env);
        assert_eq!(context.hostname.as_deref(), Some("alice-laptop"));
        assert_eq!(context.username.as_deref(), Some("alice"));
        assert_eq!(context.home.as_deref(), Some("/home/alice"));

        let bare = context_from(Some("localhost".to_string()), |key| {
            (key == "HOME").then(|| "/".to_string())
        });
        assert_eq!(bare.hostname, None);
        assert_eq!(bare.username, None);
        assert_eq!(bare.home, None);
    }

    // ── Source parsers ────────────────────────────────────────────────────────

    /// Bugzilla hits carry the bug number and a show_bug link.
    #[test]
    fn test_bugzilla_parse() {
        let body = r#"{"bugs":[
            {"id":2251234,"summary":"no sound after suspend on Tiger Lake","status":"CLOSED","resolution":"ERRATA"},
            {"id":2250001,"summary":"pipewire crash","status":"VERIFIED","resolution":""}
        ]}"#;
        let hits = SourceKind::FedoraBugzilla.parse(body, 5).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].title, "[BUG #2251234] no sound after suspend on Tiger Lake");
        assert_eq!(hits[0].url, "https://bugzilla.redhat.com/show_bug.cgi?id=2251234");
        assert_eq!(hits[0].snippet, "status: CLOSED ERRATA");
        assert_eq!(hits[1].snippet, "status: VERIFIED");
        assert!(hits.iter().all(|h| h.source == "fedora-bugzilla"));
    }

    /// Ask Fedora topics link to /t/<slug>/<id>; the limit is applied.
    #[test]
    fn test_discourse_parse_and_limit() {
        let body = r#"{"posts":[],"topics":[
            {"id":1,"title":"Audio gone","slug":"audio-gone","posts_count":4,"views":90},
            {"id":2,"title":"Still no audio","slug":"still-no-audio","posts_count":2,"views":10}
        ]}"#;
        let hits = SourceKind::AskFedora.parse(body, 1).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].url, "https://ask.fedoraproject.org/t/audio-gone/1");
        assert_eq!(hits[0].snippet, "4 posts, 90 views");
    }

    /// The opensearch array is zipped into hits.
    #[test]
    fn test_arch_wiki_parse() {
        let body = r#"["pipewire",["PipeWire","PipeWire/Examples"],["",""],
            ["https://wiki.archlinux.org/title/PipeWire","https://wiki.archlinux.org/title/PipeWire/Examples"]]"#;
        let hits = SourceKind::ArchWiki.parse(body, 5).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[1].title, "PipeWire/Examples");
        assert_eq!(hits[1].url, "https://wiki.archlinux.org/title/PipeWire/Examples");
    }

    /// GitHub reactions are read from the `+1` key.
    #[test]
    fn test_github_parse() {
        let body = r#"{"total_count":1,"items":[
            {"title":"No sound on ALC287","html_url":"https://github.com/thesofproject/linux/issues/4000",
             "state":"closed","reactions":{"+1":12,"-1":0}}
        ]}"#;
        let hits = SourceKind::GithubIssues.parse(body, 5).unwrap();
        assert_eq!(hits[0].snippet, "closed, 12 reactions");
    }

    /// The abstract comes first; disambiguation groups without a URL are
    /// dropped.
    #[test]
    fn test_duckduckgo_parse() {
        let body = r#"{"Heading":"PipeWire","AbstractText":"PipeWire is a server for audio.",
            "AbstractURL":"https://en.wikipedia.org/wiki/PipeWire",
            "RelatedTopics":[
                {"Text":"WirePlumber - session manager","FirstURL":"https://duckduckgo.com/WirePlumber"},
                {"Name":"See also","Topics":[]}
            ]}"#;
        let hits = SourceKind::DuckDuckGo.parse(body, 5).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].title, "PipeWire");
        assert_eq!(hits[1].title, "WirePlumber");
        assert!(!SourceKind::DuckDuckGo.is_definitive());
    }

    /// An HTML error page is a knowledge failure naming the source.
    #[test]
    fn test_unexpected_body_is_knowledge_error() {
        match SourceKind::ArchWiki.parse("<html>busy</html>", 5) {
            Err(MenderError::Knowledge { source_name, .. }) => assert_eq!(source_name, "arch-wiki"),
            other => panic!("expected Knowledge error, got {:?}", other),
        }
    }

    /// Priority order puts the three definitive sources first.
    #[test]
    fn test_source_priority() {
        let definitive: Vec<bool> = SourceKind::ALL.iter().map(|k| k.is_definitive()).collect();
        assert_eq!(definitive, vec![true, true, true, false, false]);
    }
}
