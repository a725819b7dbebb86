use super::*;

#[cfg(unix)]
#[test]
fn exit_code_of_reads_the_code() {
    use std::os::unix::process::ExitStatusExt;
    assert_eq!(exit_code_of(ExitStatus::from_raw(0)), 0);
    assert_eq!(exit_code_of(ExitStatus::from_raw(1 << 8)), 1);
    assert_eq!(exit_code_of(ExitStatus::from_raw(42 << 8)), 42);
}

#[cfg(unix)]
#[test]
fn exit_code_of_maps_signals_like_a_shell() {
    use std::os::unix::process::ExitStatusExt;
    assert_eq!(exit_code_of(ExitStatus::from_raw(15)), 143);
    assert_eq!(exit_code_of(ExitStatus::from_raw(9)), 137);
}

#[cfg(target_os = "linux")]
#[test]
fn process_tree_sees_a_spawned_child() {
    let mut child = std::process::Command::new("sleep")
        .arg("5")
        .spawn()
        .expect("spawn sleep");
    let own_pid = std::process::id();
    let tree = process_tree(own_pid).expect("read /proc");
    let children = tree.get(&own_pid).cloned().unwrap_or_default();
    assert!(
        children.contains(&child.id()),
        "child {} not in {children:?}",
        child.id()
    );
    child.kill().ok();
    child.wait().ok();
}

#[test]
fn shutdown_hooks_register_and_unregister() {
    let id = register_shutdown_hook(u32::MAX, false, false);
    let hooks = SHUTDOWN_HOOKS.lock().unwrap();
    assert!(hooks.as_ref().unwrap().actions.contains_key(&id));
    drop(hooks);
    unregister_shutdown_hook(id);
    let hooks = SHUTDOWN_HOOKS.lock().unwrap();
    assert!(!hooks.as_ref().unwrap().actions.contains_key(&id));
}
