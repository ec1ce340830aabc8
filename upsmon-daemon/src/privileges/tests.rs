use nix::unistd::{getgid, Gid, Uid, User};

use super::*;

#[test]
fn group_list_for_root_is_non_empty() {
    let groups = group_list("root", Gid::from_raw(0)).unwrap();
    assert!(!groups.is_empty());
    assert!(groups.contains(&Gid::from_raw(0)));
}

#[test]
fn group_list_for_current_user_includes_primary_group() {
    let user = User::from_uid(nix::unistd::getuid()).unwrap().unwrap();
    let groups = group_list(&user.name, user.gid).unwrap();
    assert!(groups.contains(&user.gid));
}

#[test]
fn capture_requires_root() {
    if getgid().as_raw() == 0 {
        // Meaningful only when running unprivileged.
        return;
    }
    let err = PrivilegeContext::capture("root").unwrap_err();
    assert!(matches!(err, DaemonError::NotRoot(_)));
}

#[test]
fn capture_rejects_unknown_user() {
    if getgid().as_raw() != 0 {
        return;
    }
    let err = PrivilegeContext::capture("no-such-user-upsmon").unwrap_err();
    assert!(matches!(err, DaemonError::UserNotFound(_)));
}

#[test]
fn release_is_idempotent_on_empty_context() {
    let mut ctx = PrivilegeContext::default();
    ctx.release();
    ctx.release();
    assert!(ctx.snapshots.is_none());
}

#[test]
fn switching_without_snapshots_is_a_no_op() {
    let ctx = PrivilegeContext::default();
    ctx.drop_to_unprivileged().unwrap();
    ctx.elevate_to_privileged().unwrap();
}

#[test]
fn round_trip_restores_privileged_identity() {
    if !Uid::effective().is_root() || getgid().as_raw() != 0 {
        eprintln!("skipping privilege round-trip: requires root");
        return;
    }

    let mut ctx = PrivilegeContext::capture("nobody").unwrap();
    let before = ctx.snapshots.as_ref().unwrap().privileged.clone();

    ctx.drop_to_unprivileged().unwrap();
    ctx.elevate_to_privileged().unwrap();

    let root = User::from_name("root").unwrap().unwrap();
    let after = snapshot_current(&root).unwrap();
    assert_eq!(before, after);

    ctx.release();
    assert!(ctx.snapshots.is_none());
}
