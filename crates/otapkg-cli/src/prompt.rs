//! Terminal-backed install listener.

use otapkg_client::transfer::{BoxFuture, Credentials};
use otapkg_installer::listener::{Advisory, DownloadSummary, InstallListener};
use otapkg_installer::state::InstallStep;

/// Answers installation questions on stdin. With `assume_yes` every
/// confirmation is granted without prompting (credentials are still never
/// invented).
#[derive(Debug, Clone, Copy)]
pub struct PromptListener {
    assume_yes: bool,
}

impl PromptListener {
    /// An interactive listener; set `assume_yes` to auto-confirm.
    #[must_use]
    pub fn new(assume_yes: bool) -> Self {
        Self { assume_yes }
    }

    async fn confirm(self, question: String) -> bool {
        if self.assume_yes {
            println!("{question} [auto-confirmed]");
            return true;
        }
        let answer = tokio::task::spawn_blocking(move || {
            println!("{question} [y/N]");
            let mut line = String::new();
            match std::io::stdin().read_line(&mut line) {
                Ok(_) => line.trim().eq_ignore_ascii_case("y"),
                Err(_) => false,
            }
        })
        .await;
        answer.unwrap_or(false)
    }

    async fn read_credentials(self, prompt: String) -> Option<Credentials> {
        if self.assume_yes {
            return None;
        }
        let creds = tokio::task::spawn_blocking(move || {
            println!("{prompt}");
            let mut username = String::new();
            let mut password = String::new();
            println!("username:");
            std::io::stdin().read_line(&mut username).ok()?;
            println!("password:");
            std::io::stdin().read_line(&mut password).ok()?;
            let username = username.trim().to_owned();
            if username.is_empty() {
                return None;
            }
            Some(Credentials {
                username,
                password: password.trim_end_matches(['\r', '\n']).to_owned(),
            })
        })
        .await;
        creds.unwrap_or(None)
    }
}

impl InstallListener for PromptListener {
    fn warn<'a>(&'a self, advisory: &'a Advisory) -> BoxFuture<'a, bool> {
        Box::pin(self.confirm(format!("warning: {advisory}. Continue?")))
    }

    fn confirm_download<'a>(&'a self, summary: &'a DownloadSummary) -> BoxFuture<'a, bool> {
        let mut line = format!("download '{}'", summary.name);
        if let Some(size) = summary.archive_size {
            line.push_str(&format!(" ({size} bytes)"));
        }
        line.push_str(&format!(" from {}?", summary.url));
        Box::pin(self.confirm(line))
    }

    fn confirm_auth_path<'a>(&'a self, names: &'a [String]) -> BoxFuture<'a, bool> {
        Box::pin(self.confirm(format!("trust signer path {}?", names.join(" -> "))))
    }

    fn confirm_redirect<'a>(&'a self, from: &'a str, to: &'a str) -> BoxFuture<'a, bool> {
        Box::pin(self.confirm(format!("follow redirect {from} -> {to}?")))
    }

    fn keep_data<'a>(&'a self, suite: &'a str) -> BoxFuture<'a, bool> {
        Box::pin(self.confirm(format!("keep stored data of the previous '{suite}' install?")))
    }

    fn provide_credentials<'a>(
        &'a self,
        url: &'a str,
        proxy: bool,
    ) -> BoxFuture<'a, Option<Credentials>> {
        let prompt = if proxy {
            format!("proxy authentication required for {url}")
        } else {
            format!("authentication required for {url}")
        };
        Box::pin(self.read_credentials(prompt))
    }

    fn progress(&self, step: InstallStep, received: u64, total: Option<u64>) {
        match total {
            Some(total) => log::info!("step {}: {received}/{total} bytes", step.number()),
            None => log::info!("step {}: {received} bytes", step.number()),
        }
    }
}
