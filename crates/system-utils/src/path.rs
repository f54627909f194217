use std::path::PathBuf;

pub fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home);
        }
    }
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaves_absolute_paths_alone() {
        assert_eq!(expand_tilde("/tmp/limits.json"), PathBuf::from("/tmp/limits.json"));
    }

    #[test]
    fn expands_home_prefix() {
        if let Ok(home) = std::env::var("HOME") {
            assert_eq!(
                expand_tilde("~/.vault-exec/x.json"),
                PathBuf::from(home).join(".vault-exec/x.json")
            );
        }
    }
}
