mod common;

use std::time::Duration;

use common::{FAKE_PUBLIC_KEY, FakeProvider, Fixture, api_error, running, status, stopped};
use vultr_driver::types::ScriptKind;
use vultr_driver::{
    Attached, Error, MachineState, PollPolicy, ProvisionError, ProvisionedMachine,
};

fn created_machine(id: &str, ip: &str) -> ProvisionedMachine {
    ProvisionedMachine {
        instance_id: Some(id.into()),
        public_ip: ip.into(),
        ..ProvisionedMachine::default()
    }
}

// ── Create ───────────────────────────────────────────────────────────

#[tokio::test]
async fn create_provisions_rancheros_on_custom_os() {
    let fx = Fixture::new();
    let provider = FakeProvider::new();
    provider.queue_polls([
        status("pending", "none", "stopped", "0", "0"),
        status("active", "installingbooting", "running", "0.0.0.0", "0"),
        status("active", "ok", "running", "203.0.113.7", "0"),
    ]);
    let mut driver = fx.driver(&provider);

    driver.create().await.unwrap();

    let machine = driver.machine();
    assert_eq!(machine.instance_id.as_deref(), Some("sub-3"));
    assert_eq!(machine.public_ip, "203.0.113.7");
    assert_eq!(machine.private_ip, "");
    assert!(machine.created_at.is_some());
    assert_eq!(provider.count("get_server"), 3);

    let key = machine.ssh_key.clone().unwrap();
    assert!(key.is_owned());
    assert_eq!(driver.get_ssh_username(), "rancher");
    assert!(fx.store.path().join("machines/box/id_rsa.pub").exists());

    let script = machine.script.clone().unwrap();
    assert!(script.is_owned());
    let stored = provider.with(|s| s.scripts[&script.id].clone());
    assert_eq!(stored.kind, ScriptKind::Pxe);
    assert_eq!(stored.name, "box");
    assert!(stored.content.contains("releases.rancher.com/os/v1.0.2"));

    let spec = provider.last_created();
    assert_eq!(spec.os_id, 159);
    assert_eq!(spec.script_id, Some(script.id));
    assert_eq!(spec.ssh_key_id, Some(key.id));
    let user_data = String::from_utf8(spec.user_data).unwrap();
    assert!(user_data.starts_with("#cloud-config\n"));
    assert!(user_data.contains(FAKE_PUBLIC_KEY));
    assert!(user_data.contains("/opt/rancher/bin/start.sh"));
    assert!(!user_data.contains("eth1"));
}

#[tokio::test]
async fn create_adds_private_interface_when_requested() {
    let mut fx = Fixture::new();
    fx.config.private_networking = true;
    let provider = FakeProvider::new();
    provider.queue_polls([status("active", "ok", "running", "203.0.113.7", "10.99.0.3")]);
    let mut driver = fx.driver(&provider);

    driver.create().await.unwrap();

    assert_eq!(driver.machine().private_ip, "10.99.0.3");
    let spec = provider.last_created();
    assert!(spec.private_networking);
    let user_data = String::from_utf8(spec.user_data).unwrap();
    assert!(user_data.contains("eth1"));
    assert!(user_data.contains("$private_ipv4/16"));
}

#[tokio::test]
async fn caller_pxe_script_sends_no_user_data() {
    let mut fx = Fixture::new();
    fx.config.pxe_script_id = Some(42);
    let provider = FakeProvider::new();
    provider.queue_polls([running("203.0.113.7")]);
    let mut driver = fx.driver(&provider);

    driver.create().await.unwrap();

    assert_eq!(driver.machine().script, Some(Attached::external(42)));
    assert_eq!(driver.machine().ssh_user, None);
    assert_eq!(provider.count("create_startup_script"), 0);

    let spec = provider.last_created();
    assert_eq!(spec.script_id, Some(42));
    assert!(spec.user_data.is_empty());
}

#[tokio::test]
async fn user_data_file_is_sent_verbatim() {
    let mut fx = Fixture::new();
    let path = fx.store.path().join("user-data.yml");
    let contents = "#cloud-config\npackages:\n  - htop\n";
    std::fs::write(&path, contents).unwrap();
    fx.config.os_id = 241;
    fx.config.user_data_file = Some(path);
    fx.config.boot_script_id = Some(7);
    let provider = FakeProvider::new();
    provider.queue_polls([running("203.0.113.7")]);
    let mut driver = fx.driver(&provider);

    driver.create().await.unwrap();

    let spec = provider.last_created();
    assert_eq!(spec.os_id, 241);
    assert_eq!(spec.user_data, contents.as_bytes());
    assert_eq!(spec.script_id, Some(7));
    assert_eq!(driver.machine().script, Some(Attached::external(7)));
    assert_eq!(provider.count("create_startup_script"), 0);
}

#[tokio::test]
async fn snapshot_on_default_image_uses_snapshot_image_id() {
    let mut fx = Fixture::new();
    fx.config.snapshot_id = Some("5a0c5d1c4b3f2".into());
    let provider = FakeProvider::new();
    provider.queue_polls([running("203.0.113.7")]);
    let mut driver = fx.driver(&provider);

    driver.create().await.unwrap();

    let spec = provider.last_created();
    assert_eq!(spec.os_id, 164);
    assert_eq!(spec.snapshot_id.as_deref(), Some("5a0c5d1c4b3f2"));
    assert!(spec.user_data.is_empty());
    assert_eq!(provider.count("create_startup_script"), 0);
}

#[tokio::test]
async fn binary_user_data_reaches_create_unchanged() {
    let mut fx = Fixture::new();
    let path = fx.store.path().join("user-data.gz");
    let gzip = [0x1f, 0x8b, 0x08, 0x00, 0xff, 0xfe];
    std::fs::write(&path, gzip).unwrap();
    fx.config.os_id = 241;
    fx.config.user_data_file = Some(path);
    let provider = FakeProvider::new();
    provider.queue_polls([running("203.0.113.7")]);
    let mut driver = fx.driver(&provider);

    driver.create().await.unwrap();

    assert_eq!(provider.count("create_server"), 1);
    assert_eq!(provider.last_created().user_data, gzip.to_vec());
}

#[tokio::test]
async fn existing_ssh_key_is_reused_not_generated() {
    let mut fx = Fixture::new();
    fx.config.os_id = 241;
    fx.config.ssh_key_id = Some("k-9".into());
    let provider = FakeProvider::new();
    provider.with(|s| {
        s.ssh_keys.push(vultr_driver::types::SshKeyRecord {
            id: "k-9".into(),
            name: "laptop".into(),
            public_key: "ssh-ed25519 AAAAexisting".into(),
        })
    });
    provider.queue_polls([running("203.0.113.7")]);
    let mut driver = fx.driver(&provider);

    driver.create().await.unwrap();

    assert_eq!(provider.count("create_ssh_key"), 0);
    assert_eq!(driver.machine().ssh_key, Some(Attached::external("k-9".to_string())));
    assert_eq!(provider.last_created().ssh_key_id.as_deref(), Some("k-9"));
    assert!(!fx.store.path().join("machines/box/id_rsa").exists());
}

#[tokio::test]
async fn cancellation_aborts_poll_and_keeps_instance_id() {
    let fx = Fixture::new();
    let provider = FakeProvider::new();
    let mut driver = fx.driver(&provider).with_poll_policy(PollPolicy {
        interval: Duration::from_secs(3600),
        max_attempts: None,
    });
    driver.cancellation_token().cancel();

    let err = driver.create().await.unwrap_err();

    assert!(matches!(err, Error::Provision(ProvisionError::Cancelled)));
    assert!(driver.machine().instance_id.is_some());
    assert_eq!(provider.count("get_server"), 1);

    driver.remove().await.unwrap();
    assert_eq!(provider.count("delete_server"), 1);
    assert_eq!(provider.count("delete_startup_script"), 1);
    assert_eq!(provider.count("delete_ssh_key"), 1);
}

#[tokio::test]
async fn cancellation_interrupts_a_hung_status_query() {
    let fx = Fixture::new();
    let provider = FakeProvider::new();
    provider.with(|s| s.hang_get_server = true);
    let mut driver = fx.driver(&provider);
    let token = driver.cancellation_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();
    });

    let result = tokio::time::timeout(Duration::from_secs(2), driver.create())
        .await
        .expect("create should return once cancelled");

    assert!(matches!(
        result,
        Err(Error::Provision(ProvisionError::Cancelled))
    ));
    assert!(driver.machine().instance_id.is_some());
    assert_eq!(provider.count("get_server"), 1);
}

#[tokio::test]
async fn poll_ceiling_reports_timeout() {
    let fx = Fixture::new();
    let provider = FakeProvider::new();
    let mut driver = fx.driver(&provider).with_poll_policy(PollPolicy {
        interval: Duration::from_millis(1),
        max_attempts: Some(3),
    });

    let err = driver.create().await.unwrap_err();

    assert!(matches!(
        err,
        Error::Provision(ProvisionError::AddressTimeout { attempts: 3 })
    ));
    assert_eq!(provider.count("get_server"), 3);
}

// ── Validation ───────────────────────────────────────────────────────

#[tokio::test]
async fn invalid_plan_lists_alternatives_and_creates_nothing() {
    let mut fx = Fixture::new();
    fx.config.plan_id = 999;
    let provider = FakeProvider::new();
    let mut driver = fx.driver(&provider);

    let err = driver.create().await.unwrap_err();

    match err {
        Error::Validation(vultr_driver::ValidationError::InvalidPlan {
            plan,
            region,
            available,
        }) => {
            assert_eq!(plan, 999);
            assert_eq!(region, 1);
            assert_eq!(available, vec![201, 202, 203]);
        }
        other => panic!("expected InvalidPlan, got {other:?}"),
    }
    assert!(provider.mutating_calls().is_empty());
}

#[tokio::test]
async fn invalid_region_fails_before_plan_lookup() {
    let mut fx = Fixture::new();
    fx.config.region_id = 77;
    let provider = FakeProvider::new();
    let mut driver = fx.driver(&provider);

    let err = driver.pre_create_check().await.unwrap_err();

    assert!(matches!(
        err,
        Error::Validation(vultr_driver::ValidationError::InvalidRegion(77))
    ));
    assert_eq!(provider.count("available_plans"), 0);
}

#[tokio::test]
async fn unknown_ssh_key_is_not_found() {
    let mut fx = Fixture::new();
    fx.config.ssh_key_id = Some("nope".into());
    let provider = FakeProvider::new();
    let mut driver = fx.driver(&provider);

    let err = driver.pre_create_check().await.unwrap_err();

    assert!(matches!(
        err,
        Error::Validation(vultr_driver::ValidationError::SshKeyNotFound(ref id)) if id == "nope"
    ));
    assert_eq!(provider.count("list_regions"), 0);
}

#[tokio::test]
async fn rejected_credentials_are_auth_errors() {
    let fx = Fixture::new();
    let provider = FakeProvider::new();
    provider.with(|s| s.account_error = Some(api_error("Invalid API key")));
    let mut driver = fx.driver(&provider);

    let err = driver.pre_create_check().await.unwrap_err();

    assert!(matches!(
        err,
        Error::Validation(vultr_driver::ValidationError::Auth(_))
    ));
    assert_eq!(
        provider.calls(),
        vec!["list_regions", "available_plans", "account_info"]
    );
}

#[tokio::test]
async fn option_conflicts_fail_without_provider_calls() {
    let mut fx = Fixture::new();
    fx.config.pxe_script_id = Some(1);
    fx.config.boot_script_id = Some(2);
    let provider = FakeProvider::new();
    let mut driver = fx.driver(&provider);

    let err = driver.create().await.unwrap_err();

    assert!(matches!(err, Error::Config(ref msg) if msg.contains("mutually exclusive")));
    assert!(provider.calls().is_empty());
}

// ── State and power ──────────────────────────────────────────────────

#[tokio::test]
async fn state_is_read_fresh_every_time() {
    let fx = Fixture::new();
    let provider = FakeProvider::new();
    provider.set_server("sub-1", running("203.0.113.7"));
    let driver = fx.driver(&provider).restore(created_machine("sub-1", "203.0.113.7"));

    assert_eq!(driver.get_state().await.unwrap(), MachineState::Running);
    provider.set_server("sub-1", stopped("203.0.113.7"));
    assert_eq!(driver.get_state().await.unwrap(), MachineState::Stopped);
    provider.set_server("sub-1", status("suspended", "", "", "203.0.113.7", ""));
    assert_eq!(driver.get_state().await.unwrap(), MachineState::None);
    assert_eq!(provider.count("get_server"), 3);
}

#[tokio::test]
async fn failed_state_query_is_error_state() {
    let fx = Fixture::new();
    let provider = FakeProvider::new();
    let driver = fx.driver(&provider).restore(created_machine("sub-gone", "203.0.113.7"));

    assert!(matches!(driver.get_state().await, Err(Error::Provider(_))));
    assert_eq!(driver.status().await, MachineState::Error);
}

#[tokio::test]
async fn start_on_running_machine_makes_no_remote_call() {
    let fx = Fixture::new();
    let provider = FakeProvider::new();
    provider.set_server("sub-1", running("203.0.113.7"));
    let driver = fx.driver(&provider).restore(created_machine("sub-1", "203.0.113.7"));

    driver.start().await.unwrap();
    assert!(provider.mutating_calls().is_empty());

    provider.set_server("sub-1", status("pending", "", "", "0", "0"));
    driver.start().await.unwrap();
    assert!(provider.mutating_calls().is_empty());
}

#[tokio::test]
async fn power_operations_skip_satisfied_states() {
    let fx = Fixture::new();
    let provider = FakeProvider::new();
    provider.set_server("sub-1", stopped("203.0.113.7"));
    let driver = fx.driver(&provider).restore(created_machine("sub-1", "203.0.113.7"));

    driver.stop().await.unwrap();
    driver.kill().await.unwrap();
    driver.restart().await.unwrap();
    assert!(provider.mutating_calls().is_empty());

    driver.start().await.unwrap();
    assert_eq!(provider.mutating_calls(), vec!["start_server"]);
    provider.clear_calls();

    driver.restart().await.unwrap();
    driver.kill().await.unwrap();
    assert_eq!(provider.mutating_calls(), vec!["reboot_server", "halt_server"]);
    provider.clear_calls();

    provider.set_server("sub-1", running("203.0.113.7"));
    driver.stop().await.unwrap();
    assert_eq!(provider.mutating_calls(), vec!["halt_server"]);
}

#[tokio::test]
async fn url_requires_running_machine() {
    let fx = Fixture::new();
    let provider = FakeProvider::new();
    provider.set_server("sub-1", running("203.0.113.7"));
    let driver = fx.driver(&provider).restore(created_machine("sub-1", "203.0.113.7"));

    assert_eq!(driver.get_url().await.unwrap(), "tcp://203.0.113.7:2376");

    provider.set_server("sub-1", stopped("203.0.113.7"));
    assert!(matches!(driver.get_url().await, Err(Error::NotRunning)));

    let unaddressed = fx.driver(&provider).restore(created_machine("sub-1", "0"));
    assert!(matches!(unaddressed.get_url().await, Err(Error::NotRunning)));

    provider.set_server("sub-1", running("203.0.113.7"));
    assert!(matches!(unaddressed.get_url().await, Err(Error::AddressNotSet)));
}

// ── Remove ───────────────────────────────────────────────────────────

#[tokio::test]
async fn remove_twice_is_idempotent() {
    let fx = Fixture::new();
    let provider = FakeProvider::new();
    provider.queue_polls([running("203.0.113.7")]);
    let mut driver = fx.driver(&provider);
    driver.create().await.unwrap();
    provider.clear_calls();

    driver.remove().await.unwrap();
    assert_eq!(
        provider.calls(),
        vec!["delete_server", "delete_startup_script", "delete_ssh_key"]
    );
    assert!(provider.with(|s| s.scripts.is_empty() && s.ssh_keys.is_empty()));

    driver.remove().await.unwrap();
    assert_eq!(provider.count("delete_server"), 2);
}

#[tokio::test]
async fn remove_leaves_caller_resources_alone() {
    let fx = Fixture::new();
    let provider = FakeProvider::new();
    provider.set_server("sub-1", running("203.0.113.7"));
    let driver = fx.driver(&provider).restore(ProvisionedMachine {
        script: Some(Attached::external(42)),
        ssh_key: Some(Attached::external("k-9".into())),
        ..created_machine("sub-1", "203.0.113.7")
    });

    driver.remove().await.unwrap();

    assert_eq!(provider.calls(), vec!["delete_server"]);
}

#[tokio::test]
async fn remove_without_instance_still_cleans_owned_resources() {
    let fx = Fixture::new();
    let provider = FakeProvider::new();
    let driver = fx.driver(&provider).restore(ProvisionedMachine {
        ssh_key: Some(Attached::created("key-1".into())),
        ..ProvisionedMachine::default()
    });

    driver.remove().await.unwrap();

    assert_eq!(provider.calls(), vec!["delete_ssh_key"]);
}

#[tokio::test]
async fn remove_propagates_other_failures() {
    let fx = Fixture::new();
    let provider = FakeProvider::new();
    provider.with(|s| s.delete_server_error = Some(api_error("Server is locked")));
    let driver = fx.driver(&provider).restore(ProvisionedMachine {
        ssh_key: Some(Attached::created("key-1".into())),
        ..created_machine("sub-1", "203.0.113.7")
    });

    let err = driver.remove().await.unwrap_err();

    assert!(matches!(err, Error::Teardown(_)));
    assert_eq!(provider.calls(), vec!["delete_server"]);
}
