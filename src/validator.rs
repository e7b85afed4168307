//! Structural validation of loaded scenarios.

use crate::error::ValidationError;
use crate::model::{DataDriven, Scenario, Step, TestGroup};

/// Step types a legacy step may declare. Only `http` executes; the rest
/// are accepted here and fail at run time as unsupported.
pub const STEP_TYPES: &[&str] = &["http", "grpc", "websocket", "trpc", "soap", "custom"];

/// Check required fields and apply request defaults (method `GET`,
/// legacy step type `http`).
pub fn validate_scenario(scenario: &mut Scenario) -> Result<(), ValidationError> {
    if scenario.name.trim().is_empty() {
        return Err(ValidationError::MissingName);
    }
    if scenario.steps.is_empty() && scenario.tests.is_empty() {
        return Err(ValidationError::Empty);
    }

    for (i, step) in scenario.setup.iter_mut().enumerate() {
        validate_step(step, &format!("setup[{i}]"))?;
    }
    for (i, step) in scenario.steps.iter_mut().enumerate() {
        validate_step(step, &format!("steps[{i}]"))?;
    }
    for (i, step) in scenario.teardown.iter_mut().enumerate() {
        validate_step(step, &format!("teardown[{i}]"))?;
    }

    if let Some(group) = scenario.before.as_mut() {
        validate_group(group, "before")?;
    }
    for (name, group) in scenario.tests.iter_mut() {
        validate_group(group, &format!("tests.{name}"))?;
    }
    if let Some(group) = scenario.after.as_mut() {
        validate_group(group, "after")?;
    }
    Ok(())
}

fn validate_group(group: &mut TestGroup, location: &str) -> Result<(), ValidationError> {
    if group.steps.is_empty() {
        return Err(ValidationError::EmptyGroup {
            group: location.to_string(),
        });
    }
    validate_data_driven(group.data_driven.as_ref(), location)?;
    for (i, step) in group.steps.iter_mut().enumerate() {
        validate_step(step, &format!("{location}.steps[{i}]"))?;
    }
    Ok(())
}

fn validate_data_driven(data: Option<&DataDriven>, location: &str) -> Result<(), ValidationError> {
    match data {
        Some(data) if data.source.trim().is_empty() || data.variable.trim().is_empty() => {
            Err(ValidationError::IncompleteDataDriven {
                location: location.to_string(),
            })
        }
        _ => Ok(()),
    }
}

fn validate_step(step: &mut Step, location: &str) -> Result<(), ValidationError> {
    if step.name.trim().is_empty() {
        return Err(ValidationError::MissingStepName {
            location: location.to_string(),
        });
    }
    let location = format!("{location} '{}'", step.name);
    validate_data_driven(step.data_driven.as_ref(), &location)?;

    for (name, capture) in &step.capture {
        let modes = [&capture.jsonpath, &capture.header, &capture.regex]
            .iter()
            .filter(|mode| mode.is_some())
            .count();
        if modes != 1 {
            return Err(ValidationError::AmbiguousCapture {
                location,
                capture: name.clone(),
            });
        }
    }

    if let Some(http) = step.http.as_mut() {
        if http.url.trim().is_empty() {
            return Err(ValidationError::MissingUrl { location });
        }
        http.method.get_or_insert_with(|| "GET".to_string());
        return Ok(());
    }

    let kind = step.kind.get_or_insert_with(|| "http".to_string());
    if !STEP_TYPES.contains(&kind.as_str()) {
        return Err(ValidationError::InvalidStepType {
            location,
            kind: kind.clone(),
        });
    }

    if let Some(request) = step.request.as_mut() {
        if request.url.trim().is_empty() && kind.as_str() == "http" && step.variables.is_empty() {
            return Err(ValidationError::MissingUrl { location });
        }
        request.method.get_or_insert_with(|| "GET".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> Scenario {
        Scenario::from_yaml(yaml).unwrap()
    }

    #[test]
    fn test_valid_scenario_gets_defaults() {
        let mut scenario = parse(
            r#"
name: ok
steps:
  - name: legacy
    request:
      url: /a
tests:
  main:
    steps:
      - name: structured
        http:
          url: /b
"#,
        );
        validate_scenario(&mut scenario).unwrap();
        assert_eq!(scenario.steps[0].kind.as_deref(), Some("http"));
        assert_eq!(
            scenario.steps[0].request.as_ref().unwrap().method.as_deref(),
            Some("GET")
        );
        assert_eq!(
            scenario.tests["main"].steps[0]
                .http
                .as_ref()
                .unwrap()
                .method
                .as_deref(),
            Some("GET")
        );
    }

    #[test]
    fn test_missing_name_and_empty() {
        let mut scenario = parse("name: ''\nsteps:\n  - name: a\n");
        assert_eq!(
            validate_scenario(&mut scenario),
            Err(ValidationError::MissingName)
        );

        let mut scenario = parse("name: empty\n");
        assert_eq!(validate_scenario(&mut scenario), Err(ValidationError::Empty));
    }

    #[test]
    fn test_group_and_step_errors() {
        let mut scenario = parse("name: s\ntests:\n  g:\n    steps: []\n");
        assert_eq!(
            validate_scenario(&mut scenario),
            Err(ValidationError::EmptyGroup {
                group: "tests.g".into()
            })
        );

        let mut scenario = parse("name: s\nsteps:\n  - name: x\n    http:\n      url: ''\n");
        assert!(matches!(
            validate_scenario(&mut scenario),
            Err(ValidationError::MissingUrl { .. })
        ));

        let mut scenario = parse("name: s\nsteps:\n  - name: x\n    type: ftp\n");
        assert!(matches!(
            validate_scenario(&mut scenario),
            Err(ValidationError::InvalidStepType { .. })
        ));
    }

    #[test]
    fn test_bind_only_and_non_http_steps_pass() {
        let mut scenario = parse(
            r#"
name: s
steps:
  - name: bind
    variables:
      token: abc
  - name: rpc
    type: grpc
"#,
        );
        assert!(validate_scenario(&mut scenario).is_ok());
    }

    #[test]
    fn test_capture_must_pick_one_mode() {
        let mut scenario = parse(
            r#"
name: s
steps:
  - name: x
    http:
      url: /a
    capture:
      both:
        jsonpath: a
        header: b
"#,
        );
        assert_eq!(
            validate_scenario(&mut scenario),
            Err(ValidationError::AmbiguousCapture {
                location: "steps[0] 'x'".into(),
                capture: "both".into()
            })
        );
    }

    #[test]
    fn test_incomplete_data_driven() {
        let mut scenario = parse(
            r#"
name: s
tests:
  g:
    dataDriven:
      source: users
      variable: ''
    steps:
      - name: x
        http:
          url: /a
"#,
        );
        assert!(matches!(
            validate_scenario(&mut scenario),
            Err(ValidationError::IncompleteDataDriven { .. })
        ));
    }
}
