//! robots.txt permission checking with a per-domain ruleset cache.
//!
//! Rulesets are fetched once per domain and kept for the checker's lifetime.
//! An inaccessible or unparsable robots.txt allows everything, matching the
//! convention that absence of a policy is not a prohibition.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Whether robots.txt rules are honored or bypassed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RobotsPolicy {
    /// Consult robots.txt before fetching
    Respect,
    /// Skip robots.txt checks entirely
    Ignore,
}

/// A parsed ruleset applicable to one user agent.
#[derive(Debug, Default)]
struct RobotsRules {
    /// `(allow, path_prefix)` pairs; longest matching prefix wins
    rules: Vec<(bool, String)>,
}

impl RobotsRules {
    /// Parse robots.txt content, keeping the group that best matches
    /// `user_agent` (falling back to the `*` group).
    fn parse(content: &str, user_agent: &str) -> Self {
        let ua_lower = user_agent.to_lowercase();
        let mut best: Option<(usize, Vec<(bool, String)>)> = None;
        let mut current_agents: Vec<String> = Vec::new();
        let mut current_rules: Vec<(bool, String)> = Vec::new();
        let mut in_group_body = false;

        let mut flush = |agents: &[String], rules: Vec<(bool, String)>| {
            for agent in agents {
                let match_len = if agent == "*" {
                    Some(0)
                } else if ua_lower.contains(&agent.to_lowercase()) {
                    Some(agent.len())
                } else {
                    None
                };
                if let Some(len) = match_len {
                    if best.as_ref().map_or(true, |(best_len, _)| len >= *best_len) {
                        best = Some((len, rules.clone()));
                    }
                }
            }
        };

        for line in content.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim().to_lowercase();
            let value = value.trim();

            match key.as_str() {
                "user-agent" => {
                    if in_group_body {
                        flush(&current_agents, std::mem::take(&mut current_rules));
                        current_agents.clear();
                        in_group_body = false;
                    }
                    current_agents.push(value.to_string());
                }
                "disallow" => {
                    in_group_body = true;
                    if !value.is_empty() {
                        current_rules.push((false, value.to_string()));
                    }
                }
                "allow" => {
                    in_group_body = true;
                    if !value.is_empty() {
                        current_rules.push((true, value.to_string()));
                    }
                }
                _ => {}
            }
        }
        flush(&current_agents, current_rules);

        Self {
            rules: best.map(|(_, rules)| rules).unwrap_or_default(),
        }
    }

    /// Check whether a path is allowed. Longest matching prefix wins;
    /// an `Allow` beats a `Disallow` of equal length.
    fn allows(&self, path: &str) -> bool {
        let mut verdict = true;
        let mut best_len = 0;

        for (allow, prefix) in &self.rules {
            if path.starts_with(prefix.as_str()) {
                let len = prefix.len();
                if len > best_len || (len == best_len && *allow) {
                    best_len = len;
                    verdict = *allow;
                }
            }
        }
        verdict
    }
}

/// Per-domain robots.txt checker.
pub struct RobotsChecker {
    user_agent: String,
    client: reqwest::Client,
    cache: RwLock<HashMap<String, Arc<RobotsRules>>>,
}

impl RobotsChecker {
    /// Create a checker with the given user agent and request timeout.
    pub fn new(user_agent: &str, timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(user_agent.to_string())
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_default();

        Self {
            user_agent: user_agent.to_string(),
            client,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Check whether a URL is allowed under the given policy.
    ///
    /// Fetch or parse failures allow by default.
    pub async fn is_allowed(&self, url: &str, policy: RobotsPolicy) -> bool {
        if policy == RobotsPolicy::Ignore {
            return true;
        }

        let Ok(parsed) = url::Url::parse(url) else {
            return true;
        };
        let Some(host) = parsed.host_str() else {
            return true;
        };
        let domain = format!("{}://{host}", parsed.scheme());

        let rules = self.rules_for(&domain).await;
        rules.allows(parsed.path())
    }

    async fn rules_for(&self, domain: &str) -> Arc<RobotsRules> {
        if let Some(rules) = self.cache.read().await.get(domain) {
            return rules.clone();
        }

        let robots_url = format!("{domain}/robots.txt");
        let rules = match self.client.get(&robots_url).send().await {
            Ok(response) if response.status().is_success() => match response.text().await {
                Ok(body) => {
                    tracing::debug!("Loaded robots.txt from {}", robots_url);
                    RobotsRules::parse(&body, &self.user_agent)
                }
                Err(e) => {
                    tracing::warn!("Failed to read robots.txt from {}: {}", robots_url, e);
                    RobotsRules::default()
                }
            },
            Ok(_) | Err(_) => {
                tracing::debug!("No usable robots.txt at {}", robots_url);
                RobotsRules::default()
            }
        };

        let rules = Arc::new(rules);
        self.cache
            .write()
            .await
            .insert(domain.to_string(), rules.clone());
        rules
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
User-agent: *\n\
Disallow: /private/\n\
Allow: /private/contact\n\
\n\
User-agent: ContactBot\n\
Disallow: /blocked/\n";

    #[test]
    fn test_wildcard_group() {
        let rules = RobotsRules::parse(SAMPLE, "OtherBot/1.0");
        assert!(!rules.allows("/private/data"));
        assert!(rules.allows("/private/contact"));
        assert!(rules.allows("/contact"));
    }

    #[test]
    fn test_specific_agent_group_preferred() {
        let rules = RobotsRules::parse(SAMPLE, "ContactBot/1.0");
        assert!(!rules.allows("/blocked/page"));
        // The wildcard group's disallow does not apply to the specific group
        assert!(rules.allows("/private/data"));
    }

    #[test]
    fn test_empty_robots_allows_everything() {
        let rules = RobotsRules::parse("", "ContactBot/1.0");
        assert!(rules.allows("/anything"));
    }

    #[tokio::test]
    async fn test_ignore_policy_skips_check() {
        let checker = RobotsChecker::new("ContactBot/1.0", 5);
        assert!(
            checker
                .is_allowed("https://example.com/private/", RobotsPolicy::Ignore)
                .await
        );
    }
}
