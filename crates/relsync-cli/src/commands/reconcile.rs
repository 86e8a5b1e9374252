use anyhow::{Context, Result, bail};
use relsync_core::{Coercer, Reconciler, ResourceIdentifier, SyncMode, SyncOptions};
use relsync_storage::{IdKind, ParentRecord, Schema};
use serde_json::Value;

use crate::cli::{OutputFormat, ReconcileArgs, ShowArgs};
use crate::output::{Report, print_report};

/// Runs one reconcile policy and prints the outcome with the refreshed membership.
pub async fn reconcile(
    reconciler: &Reconciler,
    mode: SyncMode,
    args: &ReconcileArgs,
    format: OutputFormat,
) -> Result<()> {
    let mut parent = parse_parent(reconciler.schema(), &args.parent)?;
    let desired = parse_ids(&args.ids)?;

    let kind = args.coerce.map(IdKind::from).unwrap_or_else(|| {
        reconciler
            .schema()
            .association(parent.entity(), &args.association)
            .map(|association| association.related.id_kind)
            .unwrap_or_default()
    });
    let options = SyncOptions::new().with_coercer(Coercer::for_kind(kind));

    let outcome = reconciler
        .reconcile(mode, &mut parent, &args.association, &desired, &options)
        .await?;

    let members: Vec<_> = parent
        .members(&args.association)
        .map(|ids| ids.iter().cloned().collect())
        .unwrap_or_default();
    print_report(
        &Report {
            parent: args.parent.clone(),
            association: args.association.clone(),
            outcome: Some(outcome),
            members,
        },
        format,
    )
}

pub async fn show(reconciler: &Reconciler, args: &ShowArgs, format: OutputFormat) -> Result<()> {
    let mut parent = parse_parent(reconciler.schema(), &args.parent)?;
    let members = reconciler
        .membership(&mut parent, &args.association)
        .await?;
    print_report(
        &Report {
            parent: args.parent.clone(),
            association: args.association.clone(),
            outcome: None,
            members: members.into_iter().collect(),
        },
        format,
    )
}

/// Parses `<entity>:<id>`, coercing the id with the entity's declared id kind.
pub fn parse_parent(schema: &Schema, raw: &str) -> Result<ParentRecord> {
    let Some((entity, id)) = raw.split_once(':') else {
        bail!("Invalid parent \"{raw}\". Expected format: <entity>:<id>");
    };
    let Some(def) = schema.entity(entity) else {
        bail!("Unknown entity \"{entity}\" in --parent");
    };
    let id = Coercer::for_kind(def.id_kind)
        .coerce(&Value::String(id.to_string()))
        .with_context(|| format!("Invalid parent id in \"{raw}\""))?;
    Ok(ParentRecord::new(entity, id))
}

/// Parses `--ids`: a JSON array of scalars or `{"type", "id"}` objects, or a
/// comma-separated list. Blank input is the empty list.
pub fn parse_ids(raw: &str) -> Result<Vec<ResourceIdentifier>> {
    let trimmed = raw.trim();
    if trimmed.starts_with('[') {
        let values: Vec<Value> =
            serde_json::from_str(trimmed).context("--ids is not a valid JSON array")?;
        return values
            .into_iter()
            .map(|value| match value {
                Value::Object(_) => serde_json::from_value::<ResourceIdentifier>(value)
                    .context("--ids entries must look like {\"type\": ..., \"id\": ...}"),
                scalar => Ok(ResourceIdentifier::new(scalar)),
            })
            .collect();
    }
    Ok(trimmed
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(ResourceIdentifier::new)
        .collect())
}
