// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Static catalog of tunnel providers: how to launch each one, how to spot its
// public URL in the process output, and how to recognise it in the process
// table when something else started it.

use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use relayprint_core::TunnelProvider;
use relayprint_core::error::{RelayError, Result};

/// `lt` prints `your url is: https://<label>.loca.lt`.
static LOCALTUNNEL_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https://[a-z0-9-]+\.loca\.lt").expect("regex compile"));

/// `cloudflared` prints the quick tunnel URL inside a banner on stderr.
static CLOUDFLARE_QUICK_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"https://[a-zA-Z0-9-]+\.trycloudflare\.com").expect("regex compile")
});

/// Command-line fingerprint of a provider process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSignature {
    /// Executable names (basename or file stem) that identify the program.
    executables: Vec<String>,
    /// Fragments that must all appear somewhere in the command line.
    required: Vec<String>,
}

impl ProcessSignature {
    pub fn new(executables: &[&str], required: &[&str]) -> Self {
        Self {
            executables: executables.iter().map(|s| s.to_string()).collect(),
            required: required.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Whether a full command line (`argv` joined by spaces) matches.
    ///
    /// Any argument may carry the executable so that interpreter-launched
    /// programs (`node /usr/bin/lt --port 7779`) are recognised too.
    pub fn matches(&self, command_line: &str) -> bool {
        let has_executable = command_line.split_whitespace().any(|token| {
            let path = Path::new(token);
            let name = path.file_name().and_then(|n| n.to_str());
            let stem = path.file_stem().and_then(|n| n.to_str());
            self.executables
                .iter()
                .any(|exe| name == Some(exe.as_str()) || stem == Some(exe.as_str()))
        });
        has_executable && self.required.iter().all(|frag| command_line.contains(frag))
    }
}

/// Everything the supervisor needs to know about one provider.
#[derive(Debug, Clone)]
pub struct ProviderSpec {
    provider: TunnelProvider,
    program: String,
    args: Vec<String>,
    /// `None` for providers whose URL is not announced on the output stream.
    url_pattern: Option<Regex>,
    signature: ProcessSignature,
}

impl ProviderSpec {
    pub fn provider(&self) -> TunnelProvider {
        self.provider
    }

    pub fn display_name(&self) -> &'static str {
        self.provider.display_name()
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn url_pattern(&self) -> Option<&Regex> {
        self.url_pattern.as_ref()
    }

    pub fn signature(&self) -> &ProcessSignature {
        &self.signature
    }

    /// Only providers that announce their URL can be launched directly.
    pub fn is_launchable(&self) -> bool {
        self.url_pattern.is_some()
    }

    /// Program and arguments joined for logging.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Mapping from provider identifier to its [`ProviderSpec`].
#[derive(Debug, Clone)]
pub struct ProviderCatalog {
    specs: HashMap<TunnelProvider, ProviderSpec>,
    target_port: u16,
}

impl ProviderCatalog {
    /// Build the catalog for tunnels forwarding to `127.0.0.1:{target_port}`.
    pub fn new(target_port: u16) -> Self {
        let local_url = format!("http://127.0.0.1:{target_port}");
        let port_arg = format!("--port {target_port}");

        let specs = [
            ProviderSpec {
                provider: TunnelProvider::LocalTunnel,
                program: "lt".into(),
                args: vec![
                    "--port".into(),
                    target_port.to_string(),
                    "--local-host".into(),
                    "127.0.0.1".into(),
                ],
                url_pattern: Some(LOCALTUNNEL_URL.clone()),
                signature: ProcessSignature::new(&["lt", "localtunnel"], &[&port_arg]),
            },
            ProviderSpec {
                provider: TunnelProvider::CloudflareQuick,
                program: "cloudflared".into(),
                args: vec![
                    "tunnel".into(),
                    "--no-autoupdate".into(),
                    "--url".into(),
                    local_url,
                ],
                url_pattern: Some(CLOUDFLARE_QUICK_URL.clone()),
                signature: ProcessSignature::new(&["cloudflared"], &["tunnel", "--url"]),
            },
            // Named tunnels run under the init system with the token in the
            // environment; listed here so they can be detected and stopped.
            ProviderSpec {
                provider: TunnelProvider::CloudflareNamed,
                program: "cloudflared".into(),
                args: vec!["tunnel".into(), "--no-autoupdate".into(), "run".into()],
                url_pattern: None,
                signature: ProcessSignature::new(&["cloudflared"], &["tunnel", "run"]),
            },
        ]
        .into_iter()
        .map(|spec| (spec.provider, spec))
        .collect();

        Self { specs, target_port }
    }

    /// Replace the launch command of a provider (custom install paths).
    ///
    /// The URL pattern and process signature are kept.
    pub fn with_command(mut self, provider: TunnelProvider, program: &str, args: &[&str]) -> Self {
        if let Some(spec) = self.specs.get_mut(&provider) {
            spec.program = program.to_string();
            spec.args = args.iter().map(|a| a.to_string()).collect();
        }
        self
    }

    pub fn target_port(&self) -> u16 {
        self.target_port
    }

    pub fn get(&self, provider: TunnelProvider) -> Option<&ProviderSpec> {
        self.specs.get(&provider)
    }

    /// Look up a provider that this process may spawn itself.
    pub fn launchable(&self, provider: TunnelProvider) -> Result<&ProviderSpec> {
        match self.specs.get(&provider) {
            Some(spec) if spec.is_launchable() => Ok(spec),
            Some(spec) => Err(RelayError::UnsupportedProvider(format!(
                "{} needs a full add-on restart and cannot be started directly",
                spec.display_name()
            ))),
            None => Err(RelayError::UnsupportedProvider(format!(
                "'{provider}' is not a tunnel provider"
            ))),
        }
    }

    pub fn specs(&self) -> impl Iterator<Item = &ProviderSpec> {
        self.specs.values()
    }
}
