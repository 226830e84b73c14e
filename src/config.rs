//! Environment (`env.yaml`) and auth (`auth.yaml`) configuration.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EnvConfig {
    #[serde(default)]
    pub environments: Vec<Environment>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Environment {
    pub name: String,
    #[serde(default, rename = "baseURL")]
    pub base_url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default, rename = "rateLimitRPS")]
    pub rate_limit_rps: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub profiles: Vec<AuthProfile>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthProfile {
    pub name: String,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub header: String,
    #[serde(default)]
    pub key: String,
}

impl EnvConfig {
    pub fn get_environment(&self, name: &str) -> Option<&Environment> {
        self.environments.iter().find(|e| e.name == name)
    }
}

impl AuthConfig {
    pub fn get_profile(&self, name: &str) -> Option<&AuthProfile> {
        self.profiles.iter().find(|p| p.name == name)
    }
}

impl AuthProfile {
    /// Headers this profile injects: jwt sends a bearer token, apikey sends
    /// the key in the named header.
    pub fn headers(&self) -> Result<HashMap<String, String>> {
        let mut out = HashMap::new();
        match self.kind.trim().to_ascii_lowercase().as_str() {
            "jwt" | "bearer" => {
                if self.token.is_empty() {
                    bail!("auth profile {:?}: jwt token is empty", self.name);
                }
                out.insert("Authorization".to_string(), format!("Bearer {}", self.token));
            }
            "apikey" | "api_key" => {
                if self.header.is_empty() {
                    bail!("auth profile {:?}: apikey header is empty", self.name);
                }
                out.insert(self.header.clone(), self.key.clone());
            }
            other => bail!("auth profile {:?}: unknown type {other:?}", self.name),
        }
        Ok(out)
    }
}

pub fn load_env_config(path: impl AsRef<Path>) -> Result<EnvConfig> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read env config {}", path.display()))?;
    serde_yaml::from_str(&raw).with_context(|| format!("parse env config {}", path.display()))
}

pub fn load_auth_config(path: impl AsRef<Path>) -> Result<AuthConfig> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read auth config {}", path.display()))?;
    serde_yaml::from_str(&raw).with_context(|| format!("parse auth config {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn environments_by_name() {
        let cfg: EnvConfig = serde_yaml::from_str(
            r#"
environments:
  - name: dev
    baseURL: http://localhost:8080
    headers: { X-Env: dev }
    rateLimitRPS: 25
  - name: prod
    baseURL: https://api.example.com
"#,
        )
        .unwrap();
        let dev = cfg.get_environment("dev").unwrap();
        assert_eq!(dev.base_url, "http://localhost:8080");
        assert_eq!(dev.rate_limit_rps, 25);
        assert_eq!(dev.headers["X-Env"], "dev");
        assert_eq!(cfg.get_environment("prod").unwrap().rate_limit_rps, 0);
        assert!(cfg.get_environment("qa").is_none());
    }

    #[test]
    fn auth_profiles_render_headers() {
        let cfg: AuthConfig = serde_yaml::from_str(
            r#"
profiles:
  - { name: user, type: jwt, token: abc }
  - { name: svc, type: apikey, header: X-API-Key, key: k1 }
  - { name: odd, type: oauth }
"#,
        )
        .unwrap();
        let jwt = cfg.get_profile("user").unwrap().headers().unwrap();
        assert_eq!(jwt["Authorization"], "Bearer abc");
        let key = cfg.get_profile("svc").unwrap().headers().unwrap();
        assert_eq!(key["X-API-Key"], "k1");
        assert!(cfg.get_profile("odd").unwrap().headers().is_err());
    }

    #[test]
    fn load_from_file() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"environments:\n  - name: dev\n    baseURL: http://x\n").unwrap();
        let cfg = load_env_config(f.path()).unwrap();
        assert_eq!(cfg.environments.len(), 1);
        assert!(load_auth_config("/definitely/missing.yaml").is_err());
    }
}
