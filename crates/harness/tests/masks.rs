use portcullis_core::{
    AttributeMap, Attributes, CreateOption, FieldDelta, FieldErrors, FieldSpec, FieldValue, MaskRules, ValueKind,
    VersionSpec,
};
use portcullis_engine::{AttributeRegistry, ControllerConfig, EngineError, ErrorKind};
use portcullis_harness::{TestController, at};
use portcullis_storage::ResourceRecord;

fn field_errors(err: EngineError) -> FieldErrors {
    match err {
        EngineError::InvalidArgument { fields, .. } => fields,
        other => panic!("expected InvalidArgument, got {other:?}"),
    }
}

fn message<'a>(errors: &'a FieldErrors, path: &str) -> Option<&'a str> {
    errors.get(path).map(String::as_str)
}

// ============================================================================
// tcp targets
// ============================================================================

#[test]
fn create_tcp_target() -> Result<(), Box<dyn std::error::Error>> {
    let t = TestController::new()?;
    let input = FieldDelta::new()
        .set("name", "db")
        .set("description", "primary database")
        .set("attributes.default_port", 5432i64);
    let target = t.controller.create(&t.ctx, &t.scope_id, "tcp", &input)?;

    assert_eq!(target.version, 1);
    assert_eq!(target.scope_id, t.scope_id);
    assert_eq!(target.name(), Some("db"));
    assert_eq!(target.description(), Some("primary database"));
    assert_eq!(target.attribute("default_port"), Some(&FieldValue::Integer(5432)));
    // Attribute columns only appear under attributes.
    assert!(target.field("default_port").is_none());
    Ok(())
}

#[test]
fn create_requires_nonzero_port() -> Result<(), Box<dyn std::error::Error>> {
    let t = TestController::new()?;

    let err = t.controller.create(&t.ctx, &t.scope_id, "tcp", &FieldDelta::new().set("name", "x")).unwrap_err();
    assert_eq!(message(&field_errors(err), "attributes.default_port"), Some("This field is required."));

    let zero = FieldDelta::new().set("attributes.default_port", 0i64);
    let err = t.controller.create(&t.ctx, &t.scope_id, "tcp", &zero).unwrap_err();
    assert_eq!(message(&field_errors(err), "attributes.default_port"), Some("This field cannot be set to zero."));

    let huge = FieldDelta::new().set("attributes.default_port", 70_000i64);
    let err = t.controller.create(&t.ctx, &t.scope_id, "tcp", &huge).unwrap_err();
    assert_eq!(message(&field_errors(err), "attributes.default_port"), Some("Must be a valid port number."));
    Ok(())
}

#[test]
fn create_reports_every_violation() -> Result<(), Box<dyn std::error::Error>> {
    let t = TestController::new()?;
    let input = FieldDelta::new()
        .set("version", 3i64)
        .set("name", 7i64)
        .set("colour", "blue")
        .clear("description");
    let errors = field_errors(t.controller.create(&t.ctx, &t.scope_id, "tcp", &input).unwrap_err());

    assert_eq!(message(&errors, "version"), Some("This is a read only field."));
    assert_eq!(message(&errors, "name"), Some("Expected a text value."));
    assert_eq!(message(&errors, "colour"), Some("Unknown field."));
    assert_eq!(message(&errors, "description"), Some("Fields cannot be cleared on create."));
    assert_eq!(message(&errors, "attributes.default_port"), Some("This field is required."));
    assert_eq!(errors.len(), 5);
    Ok(())
}

#[test]
fn unknown_subtype_rejected() -> Result<(), Box<dyn std::error::Error>> {
    let t = TestController::new()?;
    let err = t.controller.create(&t.ctx, &t.scope_id, "ssh", &FieldDelta::new()).unwrap_err();
    assert_eq!(message(&field_errors(err), "type"), Some("Unknown target type."));
    Ok(())
}

#[test]
fn port_checked_only_when_masked() -> Result<(), Box<dyn std::error::Error>> {
    let t = TestController::new()?;
    let target = t.create_tcp_target("web", 80)?;

    let renamed = t.rename(&target.id, at(1), "web-2")?;
    assert_eq!(renamed.attribute("default_port"), Some(&FieldValue::Integer(80)));

    let update = |delta: FieldDelta| t.controller.update(&t.ctx, &target.id, VersionSpec::Auto, &delta);

    let err = update(FieldDelta::new().clear("attributes.default_port")).unwrap_err();
    assert_eq!(message(&field_errors(err), "attributes.default_port"), Some("This field is required."));

    let err = update(FieldDelta::new().set("attributes.default_port", 0i64)).unwrap_err();
    assert_eq!(message(&field_errors(err), "attributes.default_port"), Some("This cannot be set to zero."));

    let updated = update(FieldDelta::new().set("attributes.default_port", 8080i64))?;
    assert_eq!(updated.version, 3);
    assert_eq!(updated.attribute("default_port"), Some(&FieldValue::Integer(8080)));
    Ok(())
}

#[test]
fn scope_change_rejected_and_nothing_stored() -> Result<(), Box<dyn std::error::Error>> {
    let t = TestController::new()?;
    let target = t.create_tcp_target("web", 443)?;

    let delta = FieldDelta::new().set("scope_id", "p_0123456789").set("name", "moved");
    let err = t.controller.update(&t.ctx, &target.id, at(1), &delta).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert_eq!(message(&field_errors(err), "scope_id"), Some("This field is immutable."));

    let current = t.read(&target.id)?;
    assert_eq!(current, target);
    Ok(())
}

#[test]
fn update_rejects_read_only_and_membership_paths() -> Result<(), Box<dyn std::error::Error>> {
    let t = TestController::new()?;
    let target = t.create_tcp_target("web", 443)?;
    let delta = FieldDelta::new()
        .set("id", "ttcp_0123456789")
        .set("created_time", FieldValue::Timestamp(0))
        .set("type", "ssh")
        .set("host_set_ids", "hsst_0123456789");
    let errors = field_errors(t.controller.update(&t.ctx, &target.id, at(1), &delta).unwrap_err());

    assert_eq!(message(&errors, "id"), Some("This field is immutable."));
    assert_eq!(message(&errors, "created_time"), Some("This is a read only field."));
    assert_eq!(message(&errors, "type"), Some("This is a read only field."));
    assert_eq!(
        message(&errors, "host_set_ids"),
        Some("This field can only be changed through membership operations.")
    );
    assert_eq!(t.read(&target.id)?.version, 1);
    Ok(())
}

#[test]
fn empty_update_rejected() -> Result<(), Box<dyn std::error::Error>> {
    let t = TestController::new()?;
    let target = t.create_tcp_target("web", 443)?;
    let err = t.controller.update(&t.ctx, &target.id, at(1), &FieldDelta::new()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert!(err.field_errors().is_some_and(|f| f.is_empty()));
    Ok(())
}

#[test]
fn set_and_clear_in_one_update() -> Result<(), Box<dyn std::error::Error>> {
    let t = TestController::new()?;
    let target = t.create_tcp_target("web", 443)?;

    let err = t
        .controller
        .update(&t.ctx, &target.id, at(1), &FieldDelta::new().set("name", "a").clear("name"))
        .unwrap_err();
    assert_eq!(message(&field_errors(err), "name"), Some("This field is both set and cleared."));

    let delta = FieldDelta::new().set("name", "renamed").clear("description");
    let updated = t.controller.update(&t.ctx, &target.id, at(1), &delta)?;
    assert_eq!(updated.name(), Some("renamed"));
    assert!(updated.description().is_none());
    Ok(())
}

#[test]
fn host_set_fields() -> Result<(), Box<dyn std::error::Error>> {
    let t = TestController::new()?;
    let hosts = t.create_host_set("edge")?;
    assert!(hosts.id.as_str().starts_with("hsst_"));
    assert!(hosts.attributes.is_empty());

    let err = t
        .controller
        .update(&t.ctx, &hosts.id, at(1), &FieldDelta::new().set("attributes.default_port", 22i64))
        .unwrap_err();
    assert_eq!(message(&field_errors(err), "attributes.default_port"), Some("Unknown field."));

    let updated = t.controller.update(&t.ctx, &hosts.id, at(1), &FieldDelta::new().clear("name"))?;
    assert!(updated.name().is_none());
    assert_eq!(updated.version, 2);
    Ok(())
}

// ============================================================================
// Plug-in subtypes
// ============================================================================

#[derive(Debug)]
struct UnixAttributes {
    socket_path: Option<String>,
}

impl Attributes for UnixAttributes {
    fn validate(&self) -> FieldErrors {
        let mut errors = FieldErrors::new();
        match self.socket_path.as_deref() {
            Some(p) if p.starts_with('/') => {}
            _ => {
                errors.insert("attributes.socket_path".into(), "Must be an absolute path.".into());
            }
        }
        errors
    }

    fn validate_for_update(&self, mask: &[&str]) -> FieldErrors {
        if mask.contains(&"attributes.socket_path") { self.validate() } else { FieldErrors::new() }
    }

    fn creation_options(&self) -> Vec<CreateOption> {
        self.socket_path
            .as_ref()
            .map(|p| vec![CreateOption::Description(format!("unix socket at {p}"))])
            .unwrap_or_default()
    }
}

fn build_unix(values: &AttributeMap) -> Box<dyn Attributes> {
    Box::new(UnixAttributes {
        socket_path: values.get("socket_path").and_then(FieldValue::as_text).map(str::to_string),
    })
}

fn project_unix(record: &ResourceRecord) -> AttributeMap {
    record.fields.get("socket_path").map(|v| ("socket_path".to_string(), v.clone())).into_iter().collect()
}

#[test]
fn registered_subtype_flows_through_controller() -> Result<(), Box<dyn std::error::Error>> {
    let mut registry = AttributeRegistry::builtin()?;
    let rules = MaskRules::new(&[FieldSpec::required("attributes.socket_path", "socket_path", ValueKind::Text)])?;
    registry.register("unix", "tunx", rules, build_unix, project_unix)?;
    let t = TestController::with_registry(registry, ControllerConfig::default())?;

    let err = t
        .controller
        .create(&t.ctx, &t.scope_id, "unix", &FieldDelta::new().set("attributes.socket_path", "relative"))
        .unwrap_err();
    assert_eq!(message(&field_errors(err), "attributes.socket_path"), Some("Must be an absolute path."));

    // Port rules belong to tcp only.
    let err = t
        .controller
        .create(&t.ctx, &t.scope_id, "unix", &FieldDelta::new().set("attributes.default_port", 22i64))
        .unwrap_err();
    assert_eq!(message(&field_errors(err), "attributes.default_port"), Some("Unknown field."));

    let created = t
        .controller
        .create(&t.ctx, &t.scope_id, "unix", &FieldDelta::new().set("attributes.socket_path", "/run/app.sock"))?;
    assert!(created.id.as_str().starts_with("tunx_"));
    assert_eq!(created.description(), Some("unix socket at /run/app.sock"));
    assert_eq!(created.attribute("socket_path"), Some(&FieldValue::from("/run/app.sock")));

    let updated = t.controller.update(
        &t.ctx,
        &created.id,
        at(1),
        &FieldDelta::new().set("attributes.socket_path", "/run/other.sock"),
    )?;
    assert_eq!(updated.attribute("socket_path"), Some(&FieldValue::from("/run/other.sock")));
    Ok(())
}
