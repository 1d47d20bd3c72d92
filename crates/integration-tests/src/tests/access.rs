//! Live access through the coordinator: native first, helper as fallback.

use std::sync::Arc;

use ctrfs::listing::parse_listing;
use ctrfs::{
    Architecture, CommandOutput, Config, ContainerHandle, Error, FileAccess, FileSource,
    HelperProvisioner, HelperSet, SessionCache,
};

use crate::fixture::{ETC_LISTING, ScriptedRunner};
use crate::integration_test;

const INSTALL: &str = "/tmp/.ctrfs-helper";

fn helpers() -> HelperSet {
    HelperSet::from_payloads([
        (Architecture::Amd64, &b"amd64 helper"[..]),
        (Architecture::Arm64, &b"arm64 helper"[..]),
        (Architecture::Arm, &[][..]),
    ])
}

fn access(runner: Arc<ScriptedRunner>) -> FileAccess {
    FileAccess::new(
        runner,
        HelperProvisioner::with_helpers(helpers(), &Config::default()),
    )
}

integration_test!(test_native_listing_direct, || {
    let runner = Arc::new(ScriptedRunner::new().on_prefix(
        &["exec", "abc123", "ls", "-la", "/etc"],
        CommandOutput::ok(ETC_LISTING),
    ));
    let entries = access(runner.clone()).list_files(&ContainerHandle::direct("abc123"), "/etc")?;

    let names: Vec<_> = entries.iter().map(|e| e.display_name()).collect();
    assert_eq!(
        names,
        [
            "./",
            "../",
            "hostname",
            "hosts",
            "mtab -> /proc/mounts",
            "os release"
        ]
    );
    assert_eq!(runner.calls().len(), 1);
    Ok(())
});

integration_test!(test_helper_fallback_nested, || {
    let runner = Arc::new(
        ScriptedRunner::new()
            .on_arg("-la", CommandOutput::failed("OCI runtime exec failed: \"ls\": not found"))
            .on_arg("uname", CommandOutput::ok("aarch64\n"))
            .on_prefix(&["cp"], CommandOutput::ok(""))
            .on_prefix(&["exec", "host123", "docker", "cp"], CommandOutput::ok(""))
            .on_arg(INSTALL, CommandOutput::ok(ETC_LISTING)),
    );
    let handle = ContainerHandle::nested("host123", "dind456");
    let entries = access(runner.clone()).list_files(&handle, "/etc")?;

    // Same shape as a native listing of the same directory.
    let native = parse_listing(ETC_LISTING);
    assert_eq!(entries.len(), native.len());
    for (helper, native) in entries.iter().zip(&native) {
        assert_eq!(helper.name, native.name);
        assert_eq!(helper.size, native.size);
        assert_eq!(helper.permissions, native.permissions);
        assert_eq!(helper.is_dir, native.is_dir);
        assert_eq!(helper.link_target, native.link_target);
    }

    let calls = runner.calls();
    let copy_in = calls
        .iter()
        .find(|c| c.len() > 3 && c[..4] == ["exec", "host123", "docker", "cp"])
        .ok_or("no second-hop copy")?;
    assert_eq!(copy_in.last().map(String::as_str), Some("dind456:/tmp/.ctrfs-helper"));

    let invoke = calls.last().ok_or("no calls")?;
    assert_eq!(
        invoke,
        &[
            "exec", "host123", "docker", "exec", "dind456", INSTALL, "ls", "/etc"
        ]
    );
    Ok(())
});

integration_test!(test_helper_injected_once_per_session, || {
    let runner = Arc::new(
        ScriptedRunner::new()
            .on_arg(INSTALL, CommandOutput::ok("hello\n"))
            .on_arg("cat", CommandOutput::failed("cat: not found"))
            .on_arg("uname", CommandOutput::ok("x86_64\n"))
            .on_prefix(&["cp"], CommandOutput::ok("")),
    );
    let access = access(runner.clone());
    let target = access.target(ContainerHandle::direct("abc123"));

    assert_eq!(target.read_file("/etc/motd")?, b"hello\n");
    assert_eq!(target.read_file("/etc/issue")?, b"hello\n");
    assert_eq!(runner.count("cp"), 1);

    // A new session starts from scratch.
    let fresh = FileAccess::with_cache(
        runner.clone(),
        HelperProvisioner::with_helpers(helpers(), &Config::default()),
        Arc::new(SessionCache::new()),
    );
    fresh.read_file(target.handle(), "/etc/motd")?;
    assert_eq!(runner.count("cp"), 2);
    Ok(())
});

integration_test!(test_all_strategies_exhausted, || {
    let runner = Arc::new(
        ScriptedRunner::new()
            .on_arg("-la", CommandOutput::failed("Error: container abc123 is not running"))
            .on_arg("uname", CommandOutput::failed("Error: container abc123 is not running"))
            .on_arg("inspect", CommandOutput::ok(r#"{"Platform":"linux/arm/v7"}"#)),
    );
    let err = access(runner)
        .list_files(&ContainerHandle::direct("abc123"), "/")
        .expect_err("both strategies fail");

    let Error::AllStrategiesExhausted { native, helper } = &err else {
        panic!("unexpected error: {err}");
    };
    assert!(native.contains("is not running"));
    // Detected 32-bit ARM, for which this build has no payload.
    assert!(helper.contains("not embedded"), "{helper}");
    Ok(())
});

integration_test!(test_strict_architecture_surfaces_detection_failure, || {
    let runner = Arc::new(
        ScriptedRunner::new().on_arg("-la", CommandOutput::failed("ls: not found")),
    );
    let config = Config {
        strict_architecture: true,
        ..Config::default()
    };
    let access = FileAccess::new(runner, HelperProvisioner::with_helpers(helpers(), &config));
    let err = access
        .list_files(&ContainerHandle::direct("abc123"), "/")
        .expect_err("detection fails");
    assert!(err.to_string().contains("cannot detect architecture"));
    Ok(())
});

integration_test!(test_concurrent_targets, || {
    let runner = Arc::new(
        ScriptedRunner::new().on_arg("-la", CommandOutput::ok(ETC_LISTING)),
    );
    let access = access(runner.clone());

    let workers: Vec<_> = ["one", "two", "three"]
        .into_iter()
        .map(|id| {
            let target = access.target(ContainerHandle::direct(id));
            std::thread::spawn(move || target.list_files("/etc"))
        })
        .collect();
    for worker in workers {
        let entries = worker.join().map_err(|_| "worker panicked")??;
        assert_eq!(entries.len(), 6);
    }
    assert_eq!(runner.calls().len(), 3);
    Ok(())
});
