//! The two-pass pipeline decoder.

use hcl::eval::{Context, Evaluate};
use hcl::{Attribute, Block, Expression, Value};
use std::collections::{HashMap, HashSet};

use crate::ConfigError;
use qid_core::builtin::CRON_RESOURCE_TYPE;
use qid_core::canonical::resource_canonical;
use qid_core::{
    GetStep, Job, Pipeline, Resource, ResourceType, RunCommand, Runner, RunnerCommand, TaskStep,
    Variable, VariableType,
};

/// Variable values supplied by the caller on create/update.
pub type VariableValues = HashMap<String, serde_json::Value>;

/// Decodes a pipeline definition, resolving `var.<name>` references from
/// the supplied values and the declared defaults. The raw document is
/// stored verbatim on the returned pipeline.
pub fn decode(raw: &str, vars: &VariableValues) -> Result<Pipeline, ConfigError> {
    let body = hcl::parse(raw)?;
    let declared = parse_variables(&body)?;
    let resolved = resolve_variables(&declared, vars)?;

    let mut var_obj = hcl::value::Map::new();
    for (name, value) in resolved {
        var_obj.insert(name, value);
    }
    let mut ctx = Context::new();
    ctx.declare_var("var", Value::Object(var_obj));

    let mut pp = build_pipeline(&body, &ctx)?;
    pp.raw = raw.to_string();
    validate(&pp)?;
    Ok(pp)
}

/// First decode pass only: the declared variables, with defaults
/// evaluated where possible.
pub fn decode_variables(raw: &str) -> Result<Vec<Variable>, ConfigError> {
    let body = hcl::parse(raw)?;
    let declared = parse_variables(&body)?;
    Ok(declared
        .into_iter()
        .map(|v| {
            let default = v
                .default
                .as_ref()
                .and_then(|expr| expr.evaluate(&Context::new()).ok())
                .and_then(|value| serde_json::to_value(value).ok());
            Variable {
                name: v.name,
                var_type: v.var_type,
                default,
            }
        })
        .collect())
}

struct DeclaredVariable {
    name: String,
    var_type: VariableType,
    default: Option<Expression>,
}

fn parse_variables(body: &hcl::Body) -> Result<Vec<DeclaredVariable>, ConfigError> {
    // Bare `type = string` identifiers evaluate to their own name.
    let mut ctx = Context::new();
    for ty in ["string", "number", "bool"] {
        ctx.declare_var(ty, Value::String(ty.to_string()));
    }

    let mut vars = Vec::new();
    let mut seen = HashSet::new();
    for block in body.blocks().filter(|b| b.identifier.as_str() == "variable") {
        let name = single_label(block)?.to_string();
        let location = format!("variable {:?}", name);
        if !seen.insert(name.clone()) {
            return Err(ConfigError::invalid(&location, "duplicate variable name"));
        }

        let mut var_type = None;
        let mut default = None;
        for attr in block.body.attributes() {
            match attr.key.as_str() {
                "type" => {
                    let ty = eval_string(attr, &ctx, &location)?;
                    var_type = Some(match ty.as_str() {
                        "string" => VariableType::String,
                        "number" => VariableType::Number,
                        "bool" => VariableType::Bool,
                        other => {
                            return Err(ConfigError::invalid(
                                &location,
                                format!("unknown type {:?}", other),
                            ));
                        }
                    });
                }
                "default" => default = Some(attr.expr.clone()),
                other => {
                    return Err(ConfigError::invalid(
                        &location,
                        format!("unknown attribute {:?}", other),
                    ));
                }
            }
        }

        let var_type = var_type
            .ok_or_else(|| ConfigError::invalid(&location, "missing required attribute \"type\""))?;
        vars.push(DeclaredVariable {
            name,
            var_type,
            default,
        });
    }
    Ok(vars)
}

/// Resolves each declared variable from the caller-supplied values,
/// falling back to the default expression. Supplied values are
/// type-checked; a variable with neither value nor default is an error.
fn resolve_variables(
    declared: &[DeclaredVariable],
    vars: &VariableValues,
) -> Result<Vec<(String, Value)>, ConfigError> {
    let mut resolved = Vec::new();
    for v in declared {
        let location = format!("variable {:?}", v.name);
        let value = match (vars.get(&v.name), &v.default) {
            (Some(supplied), _) => match (v.var_type, supplied) {
                (VariableType::String, serde_json::Value::String(s)) => Value::String(s.clone()),
                (VariableType::Number, serde_json::Value::Number(n)) => {
                    Value::Number(json_number(n, &location)?)
                }
                (VariableType::Bool, serde_json::Value::Bool(b)) => Value::Bool(*b),
                (ty, _) => {
                    return Err(ConfigError::invalid(
                        &location,
                        format!("value has invalid type, expected '{}'", type_name(ty)),
                    ));
                }
            },
            (None, Some(expr)) => {
                let value = expr.evaluate(&Context::new()).map_err(|err| {
                    ConfigError::invalid(&location, format!("invalid default: {}", err))
                })?;
                let ok = matches!(
                    (v.var_type, &value),
                    (VariableType::String, Value::String(_))
                        | (VariableType::Number, Value::Number(_))
                        | (VariableType::Bool, Value::Bool(_))
                );
                if !ok {
                    return Err(ConfigError::invalid(
                        &location,
                        format!(
                            "default has invalid type, expected '{}'",
                            type_name(v.var_type)
                        ),
                    ));
                }
                value
            }
            (None, None) => {
                return Err(ConfigError::invalid(&location, "no value and no default"));
            }
        };
        resolved.push((v.name.clone(), value));
    }
    Ok(resolved)
}

fn build_pipeline(body: &hcl::Body, ctx: &Context) -> Result<Pipeline, ConfigError> {
    let mut pp = Pipeline::default();

    for block in body.blocks() {
        match block.identifier.as_str() {
            "variable" => {}
            "resource_type" => pp.resource_types.push(parse_resource_type(block, ctx)?),
            "resource" => pp.resources.push(parse_resource(block, ctx)?),
            "runner" => pp.runners.push(parse_runner(block, ctx)?),
            "job" => pp.jobs.push(parse_job(block, ctx)?),
            other => {
                return Err(ConfigError::invalid(
                    "pipeline",
                    format!("unknown block {:?}", other),
                ));
            }
        }
    }

    if let Some(attr) = body.attributes().next() {
        return Err(ConfigError::invalid(
            "pipeline",
            format!("unexpected top-level attribute {:?}", attr.key.as_str()),
        ));
    }

    Ok(pp)
}

fn parse_resource_type(block: &Block, ctx: &Context) -> Result<ResourceType, ConfigError> {
    let name = single_label(block)?.to_string();
    let location = format!("resource_type {:?}", name);

    let mut rt = ResourceType {
        name,
        ..ResourceType::default()
    };
    for attr in block.body.attributes() {
        match attr.key.as_str() {
            "params" => rt.params = eval_string_list(attr, ctx, &location)?,
            other => {
                return Err(ConfigError::invalid(
                    &location,
                    format!("unknown attribute {:?}", other),
                ));
            }
        }
    }
    for inner in block.body.blocks() {
        let cmd = parse_runner_command(inner, ctx, &location)?;
        match inner.identifier.as_str() {
            "check" => rt.check = cmd,
            "pull" => rt.pull = cmd,
            "push" => rt.push = cmd,
            other => {
                return Err(ConfigError::invalid(
                    &location,
                    format!("unknown block {:?}", other),
                ));
            }
        }
    }
    Ok(rt)
}

fn parse_resource(block: &Block, ctx: &Context) -> Result<Resource, ConfigError> {
    let (type_name, name) = double_label(block)?;
    let location = format!("resource {:?} {:?}", type_name, name);

    let mut r = Resource {
        type_name: type_name.to_string(),
        name: name.to_string(),
        canonical: resource_canonical(type_name, name),
        ..Resource::default()
    };
    for attr in block.body.attributes() {
        match attr.key.as_str() {
            "check_interval" => r.check_interval = Some(eval_string(attr, ctx, &location)?),
            key => {
                let value = eval_scalar_string(attr, ctx, &location)?;
                r.params.insert(key.to_string(), value);
            }
        }
    }
    if let Some(inner) = block.body.blocks().next() {
        return Err(ConfigError::invalid(
            &location,
            format!("unknown block {:?}", inner.identifier.as_str()),
        ));
    }
    Ok(r)
}

fn parse_runner(block: &Block, ctx: &Context) -> Result<Runner, ConfigError> {
    let name = single_label(block)?.to_string();
    let location = format!("runner {:?}", name);

    let mut run = RunCommand::default();
    for attr in block.body.attributes() {
        match attr.key.as_str() {
            "path" => run.path = eval_string(attr, ctx, &location)?,
            "args" => run.args = eval_string_list(attr, ctx, &location)?,
            other => {
                return Err(ConfigError::invalid(
                    &location,
                    format!("unknown attribute {:?}", other),
                ));
            }
        }
    }
    if run.path.is_empty() {
        return Err(ConfigError::invalid(
            &location,
            "missing required attribute \"path\"",
        ));
    }
    Ok(Runner { id: 0, name, run })
}

fn parse_job(block: &Block, ctx: &Context) -> Result<Job, ConfigError> {
    let name = single_label(block)?.to_string();
    let location = format!("job {:?}", name);

    let mut job = Job {
        name,
        ..Job::default()
    };
    if let Some(attr) = block.body.attributes().next() {
        return Err(ConfigError::invalid(
            &location,
            format!("unknown attribute {:?}", attr.key.as_str()),
        ));
    }
    for inner in block.body.blocks() {
        match inner.identifier.as_str() {
            "get" => job.gets.push(parse_get(inner, ctx, &location)?),
            "task" => job.tasks.push(parse_task(inner, ctx, &location)?),
            "on_success" => job
                .on_success
                .push(parse_runner_command(inner, ctx, &location)?),
            "on_failure" => job
                .on_failure
                .push(parse_runner_command(inner, ctx, &location)?),
            "ensure" => job
                .ensure
                .push(parse_runner_command(inner, ctx, &location)?),
            other => {
                return Err(ConfigError::invalid(
                    &location,
                    format!("unknown block {:?}", other),
                ));
            }
        }
    }
    Ok(job)
}

fn parse_get(block: &Block, ctx: &Context, job_location: &str) -> Result<GetStep, ConfigError> {
    let (type_name, name) = double_label(block)?;
    let location = format!("{}, get {:?} {:?}", job_location, type_name, name);

    let mut get = GetStep {
        type_name: type_name.to_string(),
        name: name.to_string(),
        ..GetStep::default()
    };
    for attr in block.body.attributes() {
        match attr.key.as_str() {
            "trigger" => get.trigger = eval_bool(attr, ctx, &location)?,
            "passed" => get.passed = eval_string_list(attr, ctx, &location)?,
            other => {
                return Err(ConfigError::invalid(
                    &location,
                    format!("unknown attribute {:?}", other),
                ));
            }
        }
    }
    for inner in block.body.blocks() {
        let cmd = parse_runner_command(inner, ctx, &location)?;
        match inner.identifier.as_str() {
            "on_success" => get.on_success.push(cmd),
            "on_failure" => get.on_failure.push(cmd),
            "ensure" => get.ensure.push(cmd),
            other => {
                return Err(ConfigError::invalid(
                    &location,
                    format!("unknown block {:?}", other),
                ));
            }
        }
    }
    Ok(get)
}

fn parse_task(block: &Block, ctx: &Context, job_location: &str) -> Result<TaskStep, ConfigError> {
    let (name, runner) = double_label(block)?;
    let location = format!("{}, task {:?}", job_location, name);

    let mut task = TaskStep {
        name: name.to_string(),
        command: RunnerCommand {
            runner: runner.to_string(),
            params: HashMap::new(),
        },
        ..TaskStep::default()
    };
    for attr in block.body.attributes() {
        let value = eval_scalar_string(attr, ctx, &location)?;
        task.command.params.insert(attr.key.as_str().to_string(), value);
    }
    for inner in block.body.blocks() {
        let cmd = parse_runner_command(inner, ctx, &location)?;
        match inner.identifier.as_str() {
            "on_success" => task.on_success.push(cmd),
            "on_failure" => task.on_failure.push(cmd),
            "ensure" => task.ensure.push(cmd),
            other => {
                return Err(ConfigError::invalid(
                    &location,
                    format!("unknown block {:?}", other),
                ));
            }
        }
    }
    Ok(task)
}

/// A runner command block: the single label is the runner name, the
/// attributes become the parameter map.
fn parse_runner_command(
    block: &Block,
    ctx: &Context,
    outer: &str,
) -> Result<RunnerCommand, ConfigError> {
    let runner = single_label(block)?;
    let location = format!("{}, {} {:?}", outer, block.identifier.as_str(), runner);

    let mut cmd = RunnerCommand {
        runner: runner.to_string(),
        params: HashMap::new(),
    };
    for attr in block.body.attributes() {
        let value = eval_scalar_string(attr, ctx, &location)?;
        cmd.params.insert(attr.key.as_str().to_string(), value);
    }
    Ok(cmd)
}

/// Uniqueness and reference checks on the decoded pipeline.
fn validate(pp: &Pipeline) -> Result<(), ConfigError> {
    let mut jobs = HashSet::new();
    for j in &pp.jobs {
        if !jobs.insert(j.name.as_str()) {
            return Err(ConfigError::invalid(
                format!("job {:?}", j.name),
                "duplicate job name",
            ));
        }
    }
    let mut canonicals = HashSet::new();
    for r in &pp.resources {
        if !canonicals.insert(r.canonical.as_str()) {
            return Err(ConfigError::invalid(
                format!("resource {:?}", r.canonical),
                "duplicate resource",
            ));
        }
    }
    let mut types = HashSet::new();
    for rt in &pp.resource_types {
        if !types.insert(rt.name.as_str()) {
            return Err(ConfigError::invalid(
                format!("resource_type {:?}", rt.name),
                "duplicate resource type name",
            ));
        }
    }
    let mut runners = HashSet::new();
    for ru in &pp.runners {
        if !runners.insert(ru.name.as_str()) {
            return Err(ConfigError::invalid(
                format!("runner {:?}", ru.name),
                "duplicate runner name",
            ));
        }
    }

    for j in &pp.jobs {
        for g in &j.gets {
            let declared = pp.resource(&g.type_name, &g.name).is_some();
            if !declared && g.type_name != CRON_RESOURCE_TYPE {
                return Err(ConfigError::invalid(
                    format!("job {:?}", j.name),
                    format!("get references undeclared resource {:?}", g.resource_canonical()),
                ));
            }
        }
    }
    Ok(())
}

fn single_label(block: &Block) -> Result<&str, ConfigError> {
    match block.labels.as_slice() {
        [l] => Ok(l.as_str()),
        other => Err(ConfigError::invalid(
            format!("{} block", block.identifier.as_str()),
            format!("expected 1 label, found {}", other.len()),
        )),
    }
}

fn double_label(block: &Block) -> Result<(&str, &str), ConfigError> {
    match block.labels.as_slice() {
        [a, b] => Ok((a.as_str(), b.as_str())),
        other => Err(ConfigError::invalid(
            format!("{} block", block.identifier.as_str()),
            format!("expected 2 labels, found {}", other.len()),
        )),
    }
}

fn eval(attr: &Attribute, ctx: &Context, location: &str) -> Result<Value, ConfigError> {
    attr.expr.evaluate(ctx).map_err(|err| {
        ConfigError::invalid(
            location,
            format!("attribute {:?}: {}", attr.key.as_str(), err),
        )
    })
}

fn eval_string(attr: &Attribute, ctx: &Context, location: &str) -> Result<String, ConfigError> {
    match eval(attr, ctx, location)? {
        Value::String(s) => Ok(s),
        other => Err(ConfigError::invalid(
            location,
            format!(
                "attribute {:?}: expected string, found {}",
                attr.key.as_str(),
                value_kind(&other)
            ),
        )),
    }
}

fn eval_bool(attr: &Attribute, ctx: &Context, location: &str) -> Result<bool, ConfigError> {
    match eval(attr, ctx, location)? {
        Value::Bool(b) => Ok(b),
        other => Err(ConfigError::invalid(
            location,
            format!(
                "attribute {:?}: expected bool, found {}",
                attr.key.as_str(),
                value_kind(&other)
            ),
        )),
    }
}

fn eval_string_list(
    attr: &Attribute,
    ctx: &Context,
    location: &str,
) -> Result<Vec<String>, ConfigError> {
    match eval(attr, ctx, location)? {
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::String(s) => Ok(s),
                other => Err(ConfigError::invalid(
                    location,
                    format!(
                        "attribute {:?}: expected list of strings, found {}",
                        attr.key.as_str(),
                        value_kind(&other)
                    ),
                )),
            })
            .collect(),
        other => Err(ConfigError::invalid(
            location,
            format!(
                "attribute {:?}: expected list, found {}",
                attr.key.as_str(),
                value_kind(&other)
            ),
        )),
    }
}

/// Scalar attribute coerced to a string parameter value.
fn eval_scalar_string(
    attr: &Attribute,
    ctx: &Context,
    location: &str,
) -> Result<String, ConfigError> {
    match eval(attr, ctx, location)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(ConfigError::invalid(
            location,
            format!(
                "attribute {:?}: expected scalar, found {}",
                attr.key.as_str(),
                value_kind(&other)
            ),
        )),
    }
}

fn value_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

fn json_number(n: &serde_json::Number, location: &str) -> Result<hcl::Number, ConfigError> {
    if let Some(i) = n.as_i64() {
        return Ok(hcl::Number::from(i));
    }
    n.as_f64()
        .and_then(hcl::Number::from_f64)
        .ok_or_else(|| ConfigError::invalid(location, format!("unrepresentable number {}", n)))
}

fn type_name(ty: VariableType) -> &'static str {
    match ty {
        VariableType::String => "string",
        VariableType::Number => "number",
        VariableType::Bool => "bool",
    }
}
