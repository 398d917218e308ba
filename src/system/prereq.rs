use std::env;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use log::debug;
use sysinfo::System;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prerequisites {
    /// Where the apply tool was found, if anywhere.
    pub tool: Option<PathBuf>,
    pub cpu_vendor: Option<String>,
}

impl Prerequisites {
    pub fn intel_cpu(&self) -> bool {
        self.cpu_vendor.as_deref() == Some("GenuineIntel")
    }

    pub fn satisfied(&self) -> bool {
        self.tool.is_some() && self.intel_cpu()
    }
}

pub fn check(tool: &str) -> Prerequisites {
    let tool = env::var_os("PATH").and_then(|path| find_in_path(tool, &path));

    let mut sys = System::new();
    sys.refresh_cpu_all();
    let cpu_vendor = sys.cpus().first().map(|cpu| cpu.vendor_id().to_string());

    debug!("Prerequisites: tool {:?}, vendor {:?}", tool, cpu_vendor);
    Prerequisites { tool, cpu_vendor }
}

/// Resolves `program` the way a shell would, without running one.
pub fn find_in_path(program: &str, path: &OsStr) -> Option<PathBuf> {
    if program.contains('/') {
        let candidate = Path::new(program);
        return candidate.is_file().then(|| candidate.to_path_buf());
    }

    env::split_paths(path)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_find_in_path() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        fs::write(second.path().join("intel-undervolt"), "").unwrap();

        let path = env::join_paths([first.path(), second.path()]).unwrap();
        assert_eq!(
            find_in_path("intel-undervolt", &path),
            Some(second.path().join("intel-undervolt"))
        );
        assert_eq!(find_in_path("missing-tool", &path), None);
    }

    #[test]
    fn test_satisfied() {
        let p = Prerequisites {
            tool: Some(PathBuf::from("/usr/bin/intel-undervolt")),
            cpu_vendor: Some("GenuineIntel".to_string()),
        };
        assert!(p.satisfied());

        let amd = Prerequisites {
            cpu_vendor: Some("AuthenticAMD".to_string()),
            ..p
        };
        assert!(!amd.satisfied());
    }
}
