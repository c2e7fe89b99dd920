//! Add/del link tests against the simulated sysfs tree

use pretty_assertions::assert_eq;
use sonic_muxlink_test::{
    current_kernel, legacy_kernel, ManagerFixture, SysfsVerifier, BASE_IFACE, DEFAULT_TIMEOUT,
};
use sonic_muxlinkmgrd::{AddedLink, ErrorKind, MuxId, MuxIdRequest, MuxLinkResult};
use tokio_util::sync::CancellationToken;

fn mux(value: u32) -> MuxId {
    MuxId::new(value).unwrap()
}

async fn add(fx: &ManagerFixture, mux_id: MuxIdRequest) -> MuxLinkResult<AddedLink> {
    fx.manager
        .add_link(mux_id, BASE_IFACE, DEFAULT_TIMEOUT, CancellationToken::new())
        .await
}

async fn del(fx: &ManagerFixture, link: &str, mux_id: Option<MuxId>) -> MuxLinkResult<()> {
    fx.manager
        .del_link(link, mux_id, DEFAULT_TIMEOUT, CancellationToken::new())
        .await
}

#[tokio::test(start_paused = true)]
async fn test_add_automatic_on_empty_interface() {
    let fx = ManagerFixture::start(current_kernel()).await.unwrap();

    let link = add(&fx, MuxIdRequest::Automatic).await.unwrap();
    assert_eq!(link.iface, "qmimux0");
    assert_eq!(link.mux_id, MuxId::MIN);
    assert_eq!(fx.add_writes(), vec!["0x01"]);

    // one snapshot, one poll
    SysfsVerifier::new(&fx.sysfs).assert_enumerations(2).unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_add_automatic_fills_lowest_gap() {
    let sysfs = current_kernel()
        .with_link("qmimux0", 1)
        .with_link("qmimux1", 3)
        .with_link("qmimux2", 4);
    let fx = ManagerFixture::start(sysfs).await.unwrap();

    let link = add(&fx, MuxIdRequest::Automatic).await.unwrap();
    assert_eq!(link.mux_id, mux(2));
    assert_eq!(link.iface, "qmimux3");
    assert_eq!(fx.add_writes(), vec!["0x02"]);
}

#[tokio::test(start_paused = true)]
async fn test_add_fixed_mux_id() {
    let fx = ManagerFixture::start(current_kernel()).await.unwrap();

    let link = add(&fx, MuxIdRequest::Fixed(mux(0x2a))).await.unwrap();
    assert_eq!(link.iface, "qmimux0");
    assert_eq!(link.mux_id, mux(42));
    assert_eq!(fx.add_writes(), vec!["0x2a"]);
}

#[tokio::test(start_paused = true)]
async fn test_add_rejected_by_kernel() {
    let fx = ManagerFixture::start(current_kernel().with_link("qmimux0", 1))
        .await
        .unwrap();

    let err = add(&fx, MuxIdRequest::Fixed(mux(1))).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Failed);
    assert_eq!(fx.sysfs.links(), vec!["qmimux0"]);
}

#[tokio::test(start_paused = true)]
async fn test_add_wrong_base_iface() {
    let fx = ManagerFixture::start(current_kernel()).await.unwrap();

    let err = fx
        .manager
        .add_link(
            MuxIdRequest::Automatic,
            "wwan1",
            DEFAULT_TIMEOUT,
            CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgs);
    assert!(err.to_string().contains("must be 'wwan0'"));

    let verifier = SysfsVerifier::new(&fx.sysfs);
    verifier.assert_no_control_writes().unwrap();
    verifier.assert_enumerations(0).unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_manager_requires_mux_support() {
    let err = ManagerFixture::start(current_kernel().without_mux_support())
        .await
        .err()
        .unwrap();
    assert_eq!(err.kind(), ErrorKind::Failed);
    assert!(err.to_string().contains("No support for multiplexing"));
}

#[tokio::test(start_paused = true)]
async fn test_add_then_del_reads_kernel_mux_id() {
    let fx = ManagerFixture::start(current_kernel()).await.unwrap();

    let link = add(&fx, MuxIdRequest::Fixed(mux(5))).await.unwrap();
    del(&fx, &link.iface, None).await.unwrap();

    assert_eq!(fx.del_writes(), vec!["0x05"]);
    SysfsVerifier::new(&fx.sysfs)
        .assert_link_absent(&link.iface)
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_del_external_link_with_kernel_mux_id() {
    let fx = ManagerFixture::start(current_kernel().with_link("qmimux4", 9))
        .await
        .unwrap();

    del(&fx, "qmimux4", None).await.unwrap();
    assert_eq!(fx.del_writes(), vec!["0x09"]);
    assert!(fx.sysfs.links().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_del_explicit_mux_id() {
    let fx = ManagerFixture::start(legacy_kernel().with_link("qmimux0", 7))
        .await
        .unwrap();

    del(&fx, "qmimux0", Some(mux(7))).await.unwrap();
    assert_eq!(fx.del_writes(), vec!["0x07"]);
}

#[tokio::test(start_paused = true)]
async fn test_del_missing_link() {
    let fx = ManagerFixture::start(current_kernel().with_link("qmimux0", 1))
        .await
        .unwrap();

    let err = del(&fx, "qmimux9", Some(mux(1))).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgs);
    assert!(err.to_string().contains("interface not found"));
    SysfsVerifier::new(&fx.sysfs)
        .assert_no_control_writes()
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_del_unknown_mux_id_never_writes() {
    // link created behind the manager's back on a kernel hiding mux ids
    let fx = ManagerFixture::start(legacy_kernel().with_link("qmimux0", 3))
        .await
        .unwrap();

    let err = del(&fx, "qmimux0", None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgs);
    assert!(err.to_string().contains("unknown mux id"));

    let verifier = SysfsVerifier::new(&fx.sysfs);
    verifier.assert_no_control_writes().unwrap();
    verifier.assert_link_present("qmimux0").unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_del_garbage_mux_id_attribute() {
    let sysfs = legacy_kernel().with_link("qmimux0", 3);
    let path = sysfs.layout().link_mux_id_path("qmimux0");
    let fx = ManagerFixture::start(sysfs.with_attribute(path, "bogus"))
        .await
        .unwrap();

    let err = del(&fx, "qmimux0", None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Failed);
    SysfsVerifier::new(&fx.sysfs)
        .assert_no_control_writes()
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_legacy_kernel_add_takes_first_new_link() {
    let fx = ManagerFixture::start(legacy_kernel()).await.unwrap();

    let link = add(&fx, MuxIdRequest::Automatic).await.unwrap();
    assert_eq!(link.iface, "qmimux0");
    assert_eq!(link.mux_id, MuxId::MIN);
}

#[tokio::test(start_paused = true)]
async fn test_legacy_kernel_del_uses_tracked_mux_id() {
    let fx = ManagerFixture::start(legacy_kernel()).await.unwrap();

    let first = add(&fx, MuxIdRequest::Automatic).await.unwrap();
    // allocation sees the first link through the tracking table
    let second = add(&fx, MuxIdRequest::Automatic).await.unwrap();
    assert_eq!(first.mux_id, mux(1));
    assert_eq!(second.mux_id, mux(2));
    assert_eq!(second.iface, "qmimux1");

    del(&fx, &first.iface, None).await.unwrap();
    assert_eq!(fx.del_writes(), vec!["0x01"]);

    // untracked on removal, so the id is free again
    let third = add(&fx, MuxIdRequest::Automatic).await.unwrap();
    assert_eq!(third.mux_id, mux(1));
    assert_eq!(fx.add_writes(), vec!["0x01", "0x02", "0x01"]);
}

#[tokio::test(start_paused = true)]
async fn test_legacy_kernel_reused_name_already_tracked() {
    let fx = ManagerFixture::start(legacy_kernel()).await.unwrap();

    let first = add(&fx, MuxIdRequest::Automatic).await.unwrap();
    assert_eq!(first.iface, "qmimux0");

    // removed behind the manager's back, so the name is still tracked
    fx.sysfs.remove_link("qmimux0");

    let link = add(&fx, MuxIdRequest::Fixed(mux(7))).await.unwrap();
    assert_eq!(link.iface, "qmimux0");
    assert_eq!(link.mux_id, mux(7));
    assert_eq!(fx.add_writes(), vec!["0x01", "0x07"]);

    del(&fx, "qmimux0", Some(mux(7))).await.unwrap();
    SysfsVerifier::new(&fx.sysfs)
        .assert_link_absent("qmimux0")
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_legacy_kernel_allocation_unsupported() {
    let fx = ManagerFixture::start(legacy_kernel().with_link("qmimux0", 1))
        .await
        .unwrap();

    let err = add(&fx, MuxIdRequest::Automatic).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unsupported);
    SysfsVerifier::new(&fx.sysfs)
        .assert_no_control_writes()
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_no_mux_ids_left() {
    let mut sysfs = current_kernel();
    for id in MuxId::MIN.value()..=MuxId::MAX.value() {
        sysfs = sysfs.with_link(&format!("qmimux{}", id - 1), id);
    }
    let fx = ManagerFixture::start(sysfs).await.unwrap();

    let err = add(&fx, MuxIdRequest::Automatic).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Failed);
    assert!(err.to_string().contains("No mux ids left"));
    SysfsVerifier::new(&fx.sysfs)
        .assert_no_control_writes()
        .unwrap();
}
