use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use vhostmux::proxy::GENERATED_MARKER;
use vhostmux::terminator::{Clock, Outcome, ProcessLister, Signal, Signaller, Terminator};
use vhostmux::{Config, MuxError, Multiplexer};

/// Nothing is ever running, so every stale pid file is simply released
#[derive(Clone, Copy)]
struct Idle;

impl ProcessLister for Idle {
    fn running_instances(&self, _binary: &Path) -> io::Result<BTreeSet<u32>> {
        Ok(BTreeSet::new())
    }
}

impl Signaller for Idle {
    fn send(&self, pid: u32, _signal: Signal) -> io::Result<()> {
        panic!("unexpected signal to {}", pid);
    }
}

impl Clock for Idle {
    fn sleep(&self, _duration: Duration) {}
}

struct Fixture {
    _root: TempDir,
    vhost_dir: PathBuf,
    pid_dir: PathBuf,
    call_log: PathBuf,
    config: Config,
}

/// Stand-in server: logs its arguments, writes the pid file it is handed,
/// and fails for any vhost file named `broken.vhost`.
fn fake_server(dir: &Path, call_log: &Path) -> PathBuf {
    let script = format!(
        r#"#!/bin/sh
echo "$*" >> "{log}"
for arg in "$@"; do
  case "$arg" in
    *broken.vhost*) exit 3 ;;
    "PidFile "*) p=${{arg#PidFile }}; p=${{p#\"}}; p=${{p%\"}}; echo $$ > "$p" ;;
  esac
done
exit 0
"#,
        log = call_log.display()
    );
    let path = dir.join("fake-server");
    fs::write(&path, script).unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    }
    path
}

fn fixture() -> Fixture {
    let root = tempfile::tempdir().unwrap();
    let vhost_dir = root.path().join("vhosts.d");
    let pid_dir = root.path().join("run");
    fs::create_dir(&vhost_dir).unwrap();
    fs::create_dir(&pid_dir).unwrap();
    let call_log = root.path().join("calls.log");
    let server = fake_server(root.path(), &call_log);

    let config = Config {
        vhost_dir: vhost_dir.clone(),
        pid_dir: pid_dir.clone(),
        server_binary: server,
        ..Config::default()
    };
    Fixture {
        _root: root,
        vhost_dir,
        pid_dir,
        call_log,
        config,
    }
}

fn multiplexer(config: &Config) -> Multiplexer<'_, Idle, Idle, Idle> {
    Multiplexer::with_terminator(config, Terminator::new(config, Idle, Idle, Idle))
}

fn calls(fx: &Fixture) -> Vec<String> {
    fs::read_to_string(&fx.call_log)
        .map(|log| log.lines().map(str::to_string).collect())
        .unwrap_or_default()
}

#[test]
fn full_run_spawns_generates_and_cleans_up() {
    let fx = fixture();
    fs::write(
        fx.vhost_dir.join("a.vhost"),
        "Listen 9001\n<VirtualHost *:9001>\n  ServerName a.example\n</VirtualHost>\n",
    )
    .unwrap();
    fs::write(
        fx.vhost_dir.join("b.vhost"),
        "Listen 9002\nServerName b.example\nServerAlias www.b.example\n",
    )
    .unwrap();

    // left over from an earlier run
    fs::write(fx.pid_dir.join("vhostmux-a-9001.pid"), "1\n").unwrap();
    fs::write(fx.pid_dir.join("vhostmux-gone-9009.pid"), "2\n").unwrap();
    fs::write(fx.pid_dir.join("apache2.pid"), "3\n").unwrap();

    let args = vec!["-k".to_string(), "start".to_string()];
    let report = multiplexer(&fx.config).run(&args).unwrap();

    assert_eq!(report.spawned.len(), 2);
    assert!(report.failures.is_empty());
    assert_eq!(report.base_exit_code, 0);
    assert_eq!(
        report.cleanup.outcomes,
        vec![(
            fx.pid_dir.join("vhostmux-gone-9009.pid"),
            Outcome::AlreadyStopped {
                pid: 2,
                released: true
            }
        )]
    );

    let mut remaining: Vec<String> = fs::read_dir(&fx.pid_dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    remaining.sort();
    assert_eq!(
        remaining,
        vec!["apache2.pid", "vhostmux-a-9001.pid", "vhostmux-b-9002.pid"]
    );
    let respawned = fs::read_to_string(fx.pid_dir.join("vhostmux-a-9001.pid")).unwrap();
    assert_ne!(respawned.trim(), "1");

    let proxy = fs::read_to_string(fx.config.proxy_file_path()).unwrap();
    assert_eq!(proxy.lines().next(), Some(GENERATED_MARKER));
    assert!(proxy.contains("http://localhost:9001/"));
    assert!(proxy.contains("http://localhost:9002/"));
    assert!(proxy.contains("ServerAlias www.b.example"));

    let calls = calls(&fx);
    assert_eq!(calls.len(), 3);
    assert!(calls[0].starts_with("-D MULTIPLEX -C User www-data -C Group www-data -C Include "));
    assert!(calls[0].contains("a.vhost"));
    assert!(calls[0].ends_with("vhostmux-a-9001.pid\" -k start"));
    assert!(calls[1].contains("b.vhost"));
    assert_eq!(calls[2], "-k start");
}

#[test]
fn second_run_rescans_past_the_generated_file() {
    let fx = fixture();
    fs::write(fx.vhost_dir.join("a.vhost"), "Listen 9001\nServerName a.example\n").unwrap();

    let mux = multiplexer(&fx.config);
    mux.run(&["start".to_string()]).unwrap();
    let report = mux.run(&["start".to_string()]).unwrap();

    assert_eq!(report.spawned.len(), 1);
    assert!(report.cleanup.outcomes.is_empty());
}

#[test]
fn collision_aborts_before_any_side_effect() {
    let fx = fixture();
    fs::write(fx.vhost_dir.join("a.vhost"), "Listen 9001\nServerName a.example\n").unwrap();
    fs::write(fx.vhost_dir.join("b.vhost"), "Listen 9001\nServerName b.example\n").unwrap();
    fs::write(fx.pid_dir.join("vhostmux-old-9005.pid"), "5\n").unwrap();

    let err = multiplexer(&fx.config)
        .run(&["start".to_string()])
        .unwrap_err();

    match err {
        MuxError::Collision { port, first, second } => {
            assert_eq!(port, 9001);
            assert_eq!(first, fx.vhost_dir.join("a.vhost"));
            assert_eq!(second, fx.vhost_dir.join("b.vhost"));
        }
        other => panic!("expected collision, got {:?}", other),
    }
    assert!(calls(&fx).is_empty());
    assert!(!fx.config.proxy_file_path().exists());
    assert!(fx.pid_dir.join("vhostmux-old-9005.pid").exists());
}

#[test]
fn missing_listen_aborts_the_run() {
    let fx = fixture();
    fs::write(fx.vhost_dir.join("a.vhost"), "ServerName a.example\n").unwrap();

    let err = multiplexer(&fx.config)
        .run(&["start".to_string()])
        .unwrap_err();
    assert!(matches!(err, MuxError::Parse { .. }));
    assert!(calls(&fx).is_empty());
    assert!(!fx.config.proxy_file_path().exists());
}

#[test]
fn failing_instance_does_not_stop_the_others() {
    let fx = fixture();
    fs::write(fx.vhost_dir.join("a.vhost"), "Listen 9001\n").unwrap();
    fs::write(fx.vhost_dir.join("broken.vhost"), "Listen 9002\n").unwrap();
    fs::write(fx.vhost_dir.join("c.vhost"), "Listen 9003\n").unwrap();

    let report = multiplexer(&fx.config).run(&["start".to_string()]).unwrap();

    assert_eq!(report.spawned.len(), 2);
    assert_eq!(report.failures.len(), 1);
    assert!(matches!(
        &report.failures[0],
        MuxError::SpawnFailure { vhost, reason }
            if vhost == "broken" && reason == "exited with status 3"
    ));
    assert_eq!(calls(&fx).len(), 4);
    assert_eq!(report.base_exit_code, 0);
}

#[test]
fn suggest_returns_first_gap_without_side_effects() {
    let fx = fixture();
    fs::write(fx.vhost_dir.join("a.vhost"), "Listen 9000\n").unwrap();
    fs::write(fx.vhost_dir.join("b.vhost"), "Listen 9001\n").unwrap();
    fs::write(fx.vhost_dir.join("c.vhost"), "Listen 9003\n").unwrap();

    assert_eq!(multiplexer(&fx.config).suggest().unwrap(), 9002);
    assert!(calls(&fx).is_empty());
    assert!(!fx.config.proxy_file_path().exists());
}
