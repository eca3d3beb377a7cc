#![allow(dead_code)]

//! A stand-in toolchain of POSIX shell scripts. Every script appends `NAME ARGS` to a
//! shared call log and writes the same line to its `-o` target.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

pub const ALL_TOOLS: [&str; 6] = ["aie-opt", "aie-translate", "opt", "llc", "xbridge", "clang"];

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);
static SERIAL: Mutex<()> = Mutex::new(());

/// Scripts are written and executed from one test at a time, so no forked child can
/// hold a script open for writing while it is exec'd.
pub fn serial() -> MutexGuard<'static, ()> {
    SERIAL.lock().unwrap_or_else(|e| e.into_inner())
}

pub fn temp_dir(prefix: &str) -> PathBuf {
    let base = std::env::temp_dir();
    let pid = std::process::id();
    let n = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let dir = base.join(format!("{prefix}_{pid}_{n}"));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

pub struct FakeToolchain {
    pub root: PathBuf,
    pub bin: PathBuf,
    pub calls: PathBuf,
    pub runtime_support: PathBuf,
    pub work_dir: PathBuf,
    pub input: PathBuf,
}

pub struct Builder {
    prefix: String,
    core_list: String,
    target_arch: String,
    omit: Vec<&'static str>,
    fail: Vec<(&'static str, String)>,
    hang: Vec<(&'static str, String)>,
}

impl FakeToolchain {
    pub fn builder(prefix: &str) -> Builder {
        Builder {
            prefix: prefix.to_string(),
            core_list: "[]".to_string(),
            target_arch: "AIE".to_string(),
            omit: Vec::new(),
            fail: Vec::new(),
            hang: Vec::new(),
        }
    }

    /// Every recorded invocation, in call order.
    pub fn calls(&self) -> Vec<String> {
        match std::fs::read_to_string(&self.calls) {
            Ok(s) => s.lines().map(str::to_string).collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn calls_to(&self, tool: &str) -> Vec<String> {
        let prefix = format!("{tool} ");
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with(&prefix) || c == tool)
            .collect()
    }

    pub fn work_file(&self, name: &str) -> PathBuf {
        self.work_dir.join(name)
    }

    pub fn work_dir_entries(&self) -> Vec<String> {
        let Ok(rd) = std::fs::read_dir(&self.work_dir) else {
            return Vec::new();
        };
        let mut out: Vec<String> = rd
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        out.sort();
        out
    }
}

impl Builder {
    pub fn core_list(mut self, text: &str) -> Self {
        self.core_list = text.to_string();
        self
    }

    pub fn target_arch(mut self, name: &str) -> Self {
        self.target_arch = name.to_string();
        self
    }

    pub fn omit(mut self, tool: &'static str) -> Self {
        self.omit.push(tool);
        self
    }

    /// `tool` exits 3 with a message on stderr when its arguments contain `pattern`.
    pub fn fail_when(mut self, tool: &'static str, pattern: &str) -> Self {
        self.fail.push((tool, pattern.to_string()));
        self
    }

    /// `tool` writes its output, then sleeps, when its arguments contain `pattern`.
    pub fn hang_when(mut self, tool: &'static str, pattern: &str) -> Self {
        self.hang.push((tool, pattern.to_string()));
        self
    }

    pub fn build(self) -> FakeToolchain {
        let root = temp_dir(&self.prefix);
        let bin = root.join("bin");
        std::fs::create_dir_all(&bin).expect("create bin");
        let calls = root.join("calls.log");

        let core_list_file = root.join("corelist.txt");
        std::fs::write(&core_list_file, &self.core_list).expect("write core list");
        let arch_file = root.join("target_arch.txt");
        std::fs::write(&arch_file, format!("{}\n", self.target_arch)).expect("write arch");

        let runtime_support = root.join("runtime_lib").join("me_basic.o");
        std::fs::create_dir_all(runtime_support.parent().expect("parent")).expect("create lib");
        std::fs::write(&runtime_support, b"runtime support object").expect("write object");

        let input = root.join("input.mlir");
        std::fs::write(&input, "module @array {}\n").expect("write input");

        for tool in ALL_TOOLS {
            if self.omit.contains(&tool) {
                continue;
            }
            let mut script = String::from("#!/bin/sh\n");
            script.push_str(&format!("echo \"{tool} $*\" >> '{}'\n", calls.display()));
            for (t, pattern) in &self.fail {
                if *t == tool {
                    script.push_str(&format!(
                        "case \" $* \" in *\"{pattern}\"*) echo \"{tool}: boom\" >&2; exit 3;; esac\n"
                    ));
                }
            }
            if tool == "aie-translate" {
                script.push_str(&format!(
                    "case \"$1\" in\n  --aie-generate-corelist) cat '{}'; exit 0;;\n  --aie-generate-target-arch) cat '{}'; exit 0;;\nesac\n",
                    core_list_file.display(),
                    arch_file.display()
                ));
            }
            script.push_str(
                "out=\"\"\nprev=\"\"\nfor a in \"$@\"; do\n  if [ \"$prev\" = \"-o\" ]; then out=\"$a\"; fi\n  prev=\"$a\"\ndone\n",
            );
            script.push_str(&format!(
                "if [ -n \"$out\" ]; then echo \"{tool} $*\" > \"$out\"; fi\n"
            ));
            for (t, pattern) in &self.hang {
                if *t == tool {
                    script.push_str(&format!("case \" $* \" in *\"{pattern}\"*) sleep 30;; esac\n"));
                }
            }
            write_executable(&bin.join(tool), &script);
        }

        FakeToolchain {
            work_dir: root.join("work"),
            root,
            bin,
            calls,
            runtime_support,
            input,
        }
    }
}

fn write_executable(path: &Path, contents: &str) {
    std::fs::write(path, contents).expect("write script");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt as _;
        let mut perms = std::fs::metadata(path).expect("stat script").permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(path, perms).expect("chmod script");
    }
}

#[cfg(unix)]
#[test]
fn scripts_record_calls_and_write_outputs() {
    let _guard = serial();
    let tc = FakeToolchain::builder("aiecc_fake_selftest").build();
    let out = tc.root.join("x.txt");
    let status = std::process::Command::new(tc.bin.join("opt"))
        .args(["-strip", "-S", "in.ll", "-o"])
        .arg(&out)
        .status()
        .expect("run opt");
    assert!(status.success());
    assert_eq!(tc.calls_to("opt").len(), 1);
    let written = std::fs::read_to_string(&out).expect("read output");
    assert!(written.starts_with("opt -strip -S in.ll -o "), "{written}");
    let _ = std::fs::remove_dir_all(&tc.root);
}
