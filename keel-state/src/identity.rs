//! Who is deploying

/// Provides the identity recorded in lock objects
pub trait Identity: Send + Sync {
    fn current_user(&self) -> String;
}

/// Identity of the local OS user (username@hostname)
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalIdentity;

impl Identity for LocalIdentity {
    fn current_user(&self) -> String {
        let username = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_else(|_| "unknown".to_string());

        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string());

        format!("{}@{}", username, hostname)
    }
}

/// Fixed identity, e.g. a service principal name from configuration
#[derive(Debug, Clone)]
pub struct StaticIdentity(pub String);

impl Identity for StaticIdentity {
    fn current_user(&self) -> String {
        self.0.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_identity_format() {
        let who = LocalIdentity.current_user();
        assert!(who.contains('@'));
    }

    #[test]
    fn test_static_identity() {
        let identity = StaticIdentity("deployer@ci".to_string());
        assert_eq!(identity.current_user(), "deployer@ci");
    }
}
