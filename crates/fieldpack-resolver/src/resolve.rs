use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use anyhow::Result;
use fieldpack_core::{
    AppVersion, EngineError, ManifestKind, StorageLocator, UpgradeManifest, VersionRange,
    APP_UPDATE_ID, APP_UPDATE_PRIORITY, SELF_UPDATE_ID, SELF_UPDATE_PRIORITY,
};
use tracing::warn;

use crate::locator::{rank_records, AppUpdateInfo, UpdateFileRecord, UpdateLocator};
use crate::repository::load_manifests;

pub const DEFAULT_MANIFESTS_SUBDIR: &str = "manifests";
pub const DEFAULT_UPDATER_APP: &str = "updater";

/// Resolution output: the ordered upgrade set plus the artifacts the
/// packager stages for the synthetic entries. An empty upgrade list means
/// the client is already current.
#[derive(Debug, Clone)]
pub struct ApplicableUpgradesResult {
    pub target_version: AppVersion,
    pub upgrades: Vec<UpgradeManifest>,
    pub estimated_size: u64,
    /// Latest update artifact on the chosen track; set when an app-update
    /// entry was appended.
    pub update_file: Option<UpdateFileRecord>,
    /// Newest stable updater artifact; set when a self-update entry was
    /// appended.
    pub updater_file: Option<UpdateFileRecord>,
}

impl ApplicableUpgradesResult {
    pub fn is_up_to_date(&self) -> bool {
        self.upgrades.is_empty()
    }

    pub fn upgrade_ids(&self) -> Vec<String> {
        self.upgrades
            .iter()
            .map(|manifest| manifest.id.clone())
            .collect()
    }
}

#[derive(Clone)]
pub struct UpgradeResolver {
    locator: UpdateLocator,
    manifests_subdir: String,
    updater_app: String,
}

impl UpgradeResolver {
    pub fn new(locator: UpdateLocator) -> Self {
        Self {
            locator,
            manifests_subdir: DEFAULT_MANIFESTS_SUBDIR.to_string(),
            updater_app: DEFAULT_UPDATER_APP.to_string(),
        }
    }

    pub fn with_updater_app(mut self, app: impl Into<String>) -> Self {
        self.updater_app = app.into();
        self
    }

    pub fn locator(&self) -> &UpdateLocator {
        &self.locator
    }

    /// Resolves the ordered, applicable upgrade set for one client.
    /// `None` means the app or its latest artifact could not be resolved;
    /// an empty upgrade list means the client is up to date.
    pub fn applicable_upgrades(
        &self,
        app: &str,
        client_version: &AppVersion,
        include_prerelease: bool,
        installer_version: Option<&AppVersion>,
    ) -> Result<Option<ApplicableUpgradesResult>> {
        let Some(folder) = self.locator.folder_for_app(app) else {
            return Ok(None);
        };
        let info = self.locator.latest_update_info(&folder)?;
        let Some(latest) = choose_track(info, include_prerelease) else {
            return Ok(None);
        };

        let manifests = load_manifests(&folder.join(&self.manifests_subdir))?;
        let filtered: Vec<UpgradeManifest> = manifests
            .into_iter()
            .filter(|manifest| {
                manifest.applies_to.contains(client_version)
                    && latest.version.as_ref().map_or(true, |latest_version| {
                        manifest.target_version.cmp_precedence(latest_version)
                            != Ordering::Greater
                    })
            })
            .collect();

        let kept = prune_conflicts(filtered);
        let mut upgrades = order_by_dependencies(kept)?;

        // A wildcard artifact carries no version of its own; the client
        // version is the best available target statement.
        let target_version = latest
            .version
            .clone()
            .unwrap_or_else(|| client_version.clone());

        let update_due = latest
            .version
            .as_ref()
            .map_or(true, |latest_version| {
                latest_version.is_newer_than(client_version)
            });
        let mut update_file = None;
        if update_due {
            upgrades.push(synthetic_manifest(
                APP_UPDATE_ID,
                "Application update",
                ManifestKind::AppUpdate,
                &target_version,
                APP_UPDATE_PRIORITY,
                Some(target_version.clone()),
            ));
            update_file = Some(latest);
        }

        let mut updater_file = None;
        if let Some(installer) = installer_version {
            if let Some(record) = self.newest_stable_updater()? {
                let updater_due = record
                    .version
                    .as_ref()
                    .map_or(true, |version| version.is_newer_than(installer));
                if updater_due {
                    let updater_target =
                        record.version.clone().unwrap_or_else(|| installer.clone());
                    upgrades.push(synthetic_manifest(
                        SELF_UPDATE_ID,
                        "Updater self-update",
                        ManifestKind::SelfUpdate,
                        &updater_target,
                        SELF_UPDATE_PRIORITY,
                        None,
                    ));
                    updater_file = Some(record);
                }
            }
        }

        let estimated_size = upgrades
            .iter()
            .map(UpgradeManifest::total_file_size)
            .sum();

        Ok(Some(ApplicableUpgradesResult {
            target_version,
            upgrades,
            estimated_size,
            update_file,
            updater_file,
        }))
    }

    /// Newest stable-track artifact in the updater app's folder.
    pub fn newest_stable_updater(&self) -> Result<Option<UpdateFileRecord>> {
        let Some(folder) = self.locator.folder_for_app(&self.updater_app) else {
            return Ok(None);
        };
        self.locator.scan_latest(&folder, false)
    }
}

/// Pre-release track only wins when `include_prerelease` is set and it is
/// strictly newer than the stable track.
fn choose_track(info: AppUpdateInfo, include_prerelease: bool) -> Option<UpdateFileRecord> {
    if !include_prerelease {
        return info.stable;
    }
    match (info.stable, info.prerelease) {
        (stable, None) => stable,
        (None, prerelease) => prerelease,
        (Some(stable), Some(prerelease)) => {
            if rank_records(&prerelease, &stable) == Ordering::Greater {
                Some(prerelease)
            } else {
                Some(stable)
            }
        }
    }
}

/// Keeps the first manifest in (priority, id) order out of every declared
/// conflict pair and drops the rest.
fn prune_conflicts(mut manifests: Vec<UpgradeManifest>) -> Vec<UpgradeManifest> {
    manifests.sort_by(|left, right| {
        left.priority
            .cmp(&right.priority)
            .then_with(|| left.id.cmp(&right.id))
    });

    let mut kept: Vec<UpgradeManifest> = Vec::new();
    for candidate in manifests {
        let clash = kept.iter().find(|existing| {
            existing.conflicts.contains(&candidate.id)
                || candidate.conflicts.contains(&existing.id)
        });
        match clash {
            Some(winner) => {
                warn!(
                    dropped = %candidate.id,
                    kept = %winner.id,
                    "dropping upgrade manifest that conflicts with a higher-priority one"
                );
            }
            None => kept.push(candidate),
        }
    }
    kept
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

/// Depth-first topological ordering over the filtered manifest set, roots
/// visited in the incoming (priority, id) order. Uses an explicit stack and
/// visiting/done marks keyed by id, so cycle detection is a plain state
/// check rather than a stack overflow.
fn order_by_dependencies(manifests: Vec<UpgradeManifest>) -> Result<Vec<UpgradeManifest>> {
    let root_ids: Vec<String> = manifests.iter().map(|m| m.id.clone()).collect();
    let by_id: BTreeMap<String, UpgradeManifest> = manifests
        .into_iter()
        .map(|manifest| (manifest.id.clone(), manifest))
        .collect();

    let mut marks: HashMap<String, Mark> = HashMap::new();
    let mut ordered: Vec<UpgradeManifest> = Vec::new();

    for root in &root_ids {
        if marks.get(root) == Some(&Mark::Done) {
            continue;
        }

        let mut stack: Vec<(String, usize)> = vec![(root.clone(), 0)];
        marks.insert(root.clone(), Mark::Visiting);

        while let Some((id, cursor)) = stack.pop() {
            let manifest = &by_id[&id];
            let mut next = cursor;
            let mut descended = false;

            while next < manifest.dependencies.len() {
                let dep = manifest.dependencies[next].clone();
                next += 1;
                // Dependencies outside the filtered set are treated as
                // already satisfied.
                if !by_id.contains_key(&dep) {
                    continue;
                }
                match marks.get(&dep) {
                    Some(Mark::Done) => {}
                    Some(Mark::Visiting) => {
                        let mut cycle: Vec<String> =
                            stack.iter().map(|(frame, _)| frame.clone()).collect();
                        cycle.push(id);
                        cycle.push(dep);
                        cycle.sort();
                        cycle.dedup();
                        return Err(EngineError::DependencyCycle(cycle.join(", ")).into());
                    }
                    None => {
                        stack.push((id.clone(), next));
                        marks.insert(dep.clone(), Mark::Visiting);
                        stack.push((dep, 0));
                        descended = true;
                        break;
                    }
                }
            }

            if !descended {
                marks.insert(id.clone(), Mark::Done);
                ordered.push(by_id[&id].clone());
            }
        }
    }

    Ok(ordered)
}

/// Synthetic entries never join the dependency graph; they are appended
/// after ordering with an empty file list that packaging fills in.
fn synthetic_manifest(
    id: &str,
    name: &str,
    kind: ManifestKind,
    target: &AppVersion,
    priority: i32,
    max_version: Option<AppVersion>,
) -> UpgradeManifest {
    UpgradeManifest {
        id: id.to_string(),
        name: name.to_string(),
        description: String::new(),
        version: target.clone(),
        kind,
        applies_to: VersionRange {
            min_version: None,
            max_version,
            exclude_versions: Vec::new(),
        },
        target_version: target.clone(),
        priority,
        dependencies: Vec::new(),
        conflicts: Vec::new(),
        storage: StorageLocator::default(),
        files: Vec::new(),
        pre_install_script: None,
        post_install_script: None,
        rollback_script: None,
        checksum: None,
        metadata: BTreeMap::new(),
    }
}
