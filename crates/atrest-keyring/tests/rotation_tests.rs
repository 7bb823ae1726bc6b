//! Rotation protocol: new primaries, staged secondaries, untouched history.

mod support;

use atrest_crypto::EncryptOptions;
use atrest_keyring::{rotate, AppConfig, Registry, RotationOutcome};

fn memory_config(env_name: &str) -> AppConfig {
    let mut config = AppConfig::default();
    config
        .environments
        .insert(env_name.into(), support::memory_environment(&[1]));
    config
}

#[test]
fn rotation_inserts_new_primary() {
    let mut config = memory_config("production");
    let outcomes = rotate(&mut config, &["production"], "testapp", false).unwrap();

    assert!(matches!(
        outcomes[..],
        [RotationOutcome::Rotated { version: 2, .. }]
    ));
    let env = config.environment("production").unwrap();
    assert_eq!(env.ciphers[0].version, 2);
    assert_eq!(env.ciphers[1].version, 1);

    let registry = Registry::load(env).unwrap();
    assert_eq!(registry.primary().version(), 2);
}

#[test]
fn rolling_deploy_stages_at_second_position() {
    let mut config = memory_config("production");
    rotate(&mut config, &["production"], "testapp", true).unwrap();

    let env = config.environment("production").unwrap();
    assert_eq!(env.ciphers[0].version, 1, "primary must be unchanged");
    assert_eq!(env.ciphers[1].version, 2, "new version staged as secondary");

    let registry = Registry::load(env).unwrap();
    assert_eq!(registry.primary().version(), 1);
    assert_eq!(registry.by_version(2).unwrap().version(), 2);
}

#[test]
fn repeated_rotation_is_monotonic_and_preserves_history() {
    let mut config = memory_config("production");
    let before = serde_json::to_value(&config.environment("production").unwrap().ciphers[0]).unwrap();

    for expected in [2u8, 3, 4] {
        let outcomes = rotate(&mut config, &["production"], "testapp", false).unwrap();
        assert!(matches!(
            outcomes[..],
            [RotationOutcome::Rotated { version, .. }] if version == expected
        ));
    }

    let env = config.environment("production").unwrap();
    let versions: Vec<u8> = env.ciphers.iter().map(|c| c.version).collect();
    assert_eq!(versions, vec![4, 3, 2, 1]);

    // The original entry is byte-identical after three rotations.
    let after = serde_json::to_value(env.ciphers.last().unwrap()).unwrap();
    assert_eq!(before, after);
}

#[test]
fn data_encrypted_before_rotation_stays_decryptable() {
    let mut config = memory_config("production");
    let registry = Registry::load(config.environment("production").unwrap()).unwrap();
    let old_blob = registry
        .encrypt(b"pre-rotation secret", &EncryptOptions::default())
        .unwrap();

    rotate(&mut config, &["production"], "testapp", false).unwrap();
    let registry = Registry::load(config.environment("production").unwrap()).unwrap();

    assert_eq!(registry.primary().version(), 2);
    assert_eq!(registry.decrypt(&old_blob).unwrap(), b"pre-rotation secret");

    // New encryptions use the new primary.
    let new_blob = registry
        .encrypt(b"post-rotation secret", &EncryptOptions::default())
        .unwrap();
    let (header, _) = atrest_crypto::Header::parse(&new_blob).unwrap();
    assert_eq!(header.version, 2);
}

#[test]
fn file_keystore_rotation_writes_new_key_files() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = AppConfig::default();
    config
        .environments
        .insert("test".into(), support::file_environment(dir.path(), &[1]));

    rotate(&mut config, &["test"], "testapp", false).unwrap();

    let env = config.environment("test").unwrap();
    let atrest_keyring::KeystoreConfig::File { key_filename, iv_filename } =
        &env.ciphers[0].keystore
    else {
        panic!("rotation must keep the keystore variant");
    };
    assert!(key_filename.ends_with("testapp_test_v2.key"));
    assert!(key_filename.exists());
    assert!(iv_filename.as_ref().unwrap().exists());

    let registry = Registry::load(env).unwrap();
    assert_eq!(registry.primary().version(), 2);
}

#[test]
fn env_keystore_rotation_reports_export_line() {
    let kek = support::kek();
    let dek = atrest_crypto::generate_key(atrest_crypto::CipherName::Aes256Cbc).unwrap();

    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    std::env::set_var(
        "ATREST_ROTATION_TEST_V1",
        STANDARD.encode(kek.wrap(&dek).unwrap()),
    );

    let mut config = AppConfig::default();
    config.environments.insert(
        "staging".into(),
        atrest_keyring::EnvironmentConfig {
            ciphers: vec![atrest_keyring::CipherEntry {
                version: 1,
                cipher_name: atrest_crypto::CipherName::Aes256Cbc,
                encoding: atrest_crypto::Encoding::Base64,
                always_add_header: true,
                keystore: atrest_keyring::KeystoreConfig::Env {
                    key_env_var: "ATREST_ROTATION_TEST_V1".into(),
                    encrypted_iv: None,
                },
                key_encrypting_key: Some(support::kek_pem()),
                key_encrypting_key_filename: None,
                wrap_scheme: atrest_crypto::WrapScheme::Oaep,
            }],
        },
    );

    let outcomes = rotate(&mut config, &["staging"], "my-app", false).unwrap();
    let RotationOutcome::Rotated { env_export: Some(export), version: 2, .. } = &outcomes[0]
    else {
        panic!("expected an export line, got {outcomes:?}");
    };
    let (var, value) = export.split_once('=').unwrap();
    assert_eq!(var, "MY_APP_STAGING_V2");

    // Exporting the reported value makes the rotated environment loadable.
    std::env::set_var(var, value);
    let registry = Registry::load(config.environment("staging").unwrap()).unwrap();
    assert_eq!(registry.primary().version(), 2);

    std::env::remove_var("ATREST_ROTATION_TEST_V1");
    std::env::remove_var(var);
}

#[test]
fn environments_without_kek_are_skipped() {
    let mut config = memory_config("production");
    config
        .environments
        .get_mut("production")
        .unwrap()
        .ciphers[0]
        .key_encrypting_key = None;

    let outcomes = rotate(&mut config, &["production"], "testapp", false).unwrap();
    assert!(matches!(outcomes[..], [RotationOutcome::Skipped { .. }]));
    assert_eq!(config.environment("production").unwrap().ciphers.len(), 1);
}

#[test]
fn empty_selection_rotates_all_environments() {
    let mut config = memory_config("a");
    config
        .environments
        .insert("b".into(), support::memory_environment(&[5]));

    let outcomes = rotate(&mut config, &[], "testapp", false).unwrap();
    assert_eq!(outcomes.len(), 2);
    assert_eq!(config.environment("a").unwrap().ciphers[0].version, 2);
    assert_eq!(config.environment("b").unwrap().ciphers[0].version, 6);
}
