//! Replacement of deprecated images and machine types.
//!
//! Instances are recreated from their original bodies, so an image or
//! machine type that became `OBSOLETE` or `DELETED` since the instance was
//! created would make the recreation fail after the originals are gone.
//! Those references are resolved here, before any mutation.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt::Write as _;

use compute_api::{INSTANCE_KIND, Instance, LinkedResource, ResourceLink};
use futures_util::future::join_all;
use tracing::{debug, info};

use crate::operations::BATCH_SIZE;
use crate::{ComputeApi, Error, Result};

/// Deprecated URL to its terminal replacement, `None` when there is none.
pub type Replacements = HashMap<String, Option<String>>;

/// Instance self link to the fields whose deprecated reference could not be
/// replaced (field name to URL).
pub type UnresolvedDependencies = Vec<(String, BTreeMap<&'static str, String>)>;

/// Fetches the transitive closure of the images and machine types
/// instances depend on, plus the replacements of deprecated ones.
pub struct DependencyDownloader<'a> {
    api: &'a dyn ComputeApi,
    pending: VecDeque<String>,
    visited: HashSet<String>,
    resources: HashMap<String, LinkedResource>,
    errors: Vec<String>,
}

impl<'a> DependencyDownloader<'a> {
    pub fn new(api: &'a dyn ComputeApi) -> Self {
        Self {
            api,
            pending: VecDeque::new(),
            visited: HashSet::new(),
            resources: HashMap::new(),
            errors: Vec::new(),
        }
    }

    pub fn add_instance(&mut self, instance: &Instance) {
        self.add(instance.image.as_deref());
        self.add(Some(&instance.machine_type));
    }

    fn add(&mut self, url: Option<&str>) {
        let Some(url) = url.filter(|u| !u.is_empty()) else {
            return;
        };
        if self.visited.insert(url.to_string()) {
            self.pending.push_back(url.to_string());
        }
    }

    fn add_resource(&mut self, resource: &LinkedResource) {
        if resource.kind == INSTANCE_KIND {
            self.add(resource.image.as_deref());
            self.add(resource.machine_type.as_deref());
        } else if let Some(deprecated) = &resource.deprecated {
            self.add(deprecated.replacement.as_deref());
        }
    }

    /// Download everything reachable, one batch at a time. A batch is up
    /// to [`BATCH_SIZE`] concurrent GETs; the REST API has no batch endpoint.
    ///
    /// Fetch failures do not stop the walk; they are returned alongside the
    /// resources and the caller decides.
    pub async fn download(mut self) -> (HashMap<String, LinkedResource>, Vec<String>) {
        while !self.pending.is_empty() {
            let take = self.pending.len().min(BATCH_SIZE);
            let batch: Vec<String> = self.pending.drain(..take).collect();
            debug!(count = batch.len(), "downloading dependencies");

            let api = self.api;
            let results = join_all(batch.iter().map(|url| api.fetch(url))).await;
            for (url, result) in batch.into_iter().zip(results) {
                match result {
                    Ok(resource) => {
                        self.add_resource(&resource);
                        self.resources.insert(url, resource);
                    }
                    Err(e) => self.errors.push(format!("{url}: {e}")),
                }
            }
        }
        (self.resources, self.errors)
    }
}

/// Follow `deprecated.replacement` chains to the first resource that can
/// still be used.
///
/// Only resources whose state would fail a create appear in the result. A
/// chain that ends without a replacement, loops, or leaves the downloaded
/// set resolves to `None`.
pub fn find_replacements(resources: &HashMap<String, LinkedResource>) -> Replacements {
    let mut replacements = Replacements::new();

    for url in resources.keys() {
        let mut current = Some(url.clone());
        let mut seen = HashSet::new();

        while let Some(link) = current.clone() {
            if !seen.insert(link.clone()) {
                current = None;
                break;
            }
            let Some(resource) = resources.get(&link) else {
                break;
            };
            match &resource.deprecated {
                Some(d) if d.will_cause_error() => current = d.replacement.clone(),
                _ => break,
            }
        }

        if current.as_ref() != Some(url) {
            replacements.insert(url.clone(), current);
        }
    }

    replacements
}

/// Rewrite each instance's `image` and `machineType` through `replacements`.
///
/// Returns the rewritten instances and every reference that had no
/// replacement.
pub fn apply_replacements(
    instances: &[Instance],
    replacements: &Replacements,
) -> (Vec<Instance>, UnresolvedDependencies) {
    let mut updated = Vec::with_capacity(instances.len());
    let mut unresolved = Vec::new();

    for instance in instances {
        let mut instance = instance.clone();
        let mut missing = BTreeMap::new();

        if let Some(image) = instance.image.clone() {
            match replacements.get(&image) {
                Some(Some(replacement)) => instance.image = Some(replacement.clone()),
                Some(None) => {
                    missing.insert("image", image);
                }
                None => {}
            }
        }

        match replacements.get(&instance.machine_type) {
            Some(Some(replacement)) => instance.machine_type = replacement.clone(),
            Some(None) => {
                missing.insert("machineType", instance.machine_type.clone());
            }
            None => {}
        }

        if !missing.is_empty() {
            unresolved.push((instance.self_link.clone(), missing));
        }
        updated.push(instance);
    }

    (updated, unresolved)
}

/// Check the instances' dependencies and return the instances to recreate.
///
/// Replacement is opt-in: without `replace`, any reference that would fail
/// aborts the move instead of being swapped silently.
pub async fn check_deprecated_resources(
    api: &dyn ComputeApi,
    instances: Vec<Instance>,
    replace: bool,
) -> Result<Vec<Instance>> {
    info!("checking for dependencies on deprecated resources");

    let mut downloader = DependencyDownloader::new(api);
    for instance in &instances {
        downloader.add_instance(instance);
    }
    let (resources, errors) = downloader.download().await;
    if !errors.is_empty() {
        return Err(Error::Step {
            step: "checking resource deprecation",
            errors,
        });
    }

    let mut replacements = find_replacements(&resources);
    if !replace {
        replacements.values_mut().for_each(|r| *r = None);
    }

    let (upgraded, unresolved) = apply_replacements(&instances, &replacements);
    if !unresolved.is_empty() {
        return Err(Error::Deprecation(unresolved_message(&unresolved, replace)));
    }

    Ok(if replace { upgraded } else { instances })
}

fn present(url: &str) -> String {
    ResourceLink::parse(url)
        .map(|link| link.to_string())
        .unwrap_or_else(|_| url.to_string())
}

fn unresolved_message(unresolved: &UnresolvedDependencies, replace: bool) -> String {
    let mut message = String::from(
        "Move aborted.\n\
         Cannot find replacement for deprecated dependencies of the following instances:\n",
    );
    for (instance, fields) in unresolved {
        let _ = write!(message, "\n  {}:\n", present(instance));
        for (field, url) in fields {
            let _ = writeln!(message, "    {field}: {}", present(url));
        }
    }
    if !replace {
        message.push_str("\n\nConsider running with --replace_deprecated");
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{FakeCompute, instance, url};
    use compute_api::{Deprecation, DeprecationState};

    const IMAGE_V1: &str = "https://compute.example.test/compute/v1/projects/os/global/images/v1";
    const IMAGE_V2: &str = "https://compute.example.test/compute/v1/projects/os/global/images/v2";
    const IMAGE_V3: &str = "https://compute.example.test/compute/v1/projects/os/global/images/v3";

    fn resource(link: &str, state: Option<DeprecationState>, replacement: Option<&str>) -> LinkedResource {
        LinkedResource {
            kind: "compute#image".into(),
            self_link: link.to_string(),
            deprecated: state.map(|state| Deprecation {
                state: Some(state),
                replacement: replacement.map(str::to_string),
            }),
            ..LinkedResource::default()
        }
    }

    fn machine_type(zone: &str, name: &str) -> LinkedResource {
        LinkedResource {
            kind: "compute#machineType".into(),
            self_link: url(&format!("zones/{zone}/machineTypes/{name}")),
            ..LinkedResource::default()
        }
    }

    fn lana(image: &str) -> Instance {
        Instance {
            image: Some(image.to_string()),
            ..instance("lana", "twilight-a", "machine_type_1", &[])
        }
    }

    fn index(resources: Vec<LinkedResource>) -> HashMap<String, LinkedResource> {
        resources
            .into_iter()
            .map(|r| (r.self_link.clone(), r))
            .collect()
    }

    #[test]
    fn test_find_replacements_follows_chains() {
        let resources = index(vec![
            resource(IMAGE_V1, Some(DeprecationState::Obsolete), Some(IMAGE_V2)),
            resource(IMAGE_V2, Some(DeprecationState::Deleted), Some(IMAGE_V3)),
            resource(IMAGE_V3, Some(DeprecationState::Deprecated), None),
        ]);

        let replacements = find_replacements(&resources);
        assert_eq!(replacements.len(), 2);
        assert_eq!(replacements[IMAGE_V1].as_deref(), Some(IMAGE_V3));
        assert_eq!(replacements[IMAGE_V2].as_deref(), Some(IMAGE_V3));
    }

    #[test]
    fn test_find_replacements_without_successor() {
        let resources = index(vec![resource(IMAGE_V1, Some(DeprecationState::Obsolete), None)]);
        assert_eq!(find_replacements(&resources)[IMAGE_V1], None);

        let cycle = index(vec![
            resource(IMAGE_V1, Some(DeprecationState::Obsolete), Some(IMAGE_V2)),
            resource(IMAGE_V2, Some(DeprecationState::Obsolete), Some(IMAGE_V1)),
        ]);
        let replacements = find_replacements(&cycle);
        assert_eq!(replacements[IMAGE_V1], None);
        assert_eq!(replacements[IMAGE_V2], None);
    }

    #[test]
    fn test_apply_replacements() {
        let replacements = Replacements::from([
            (IMAGE_V1.to_string(), Some(IMAGE_V2.to_string())),
            (url("zones/twilight-a/machineTypes/machine_type_1"), None),
        ]);

        let (updated, unresolved) = apply_replacements(&[lana(IMAGE_V1)], &replacements);
        assert_eq!(updated[0].image.as_deref(), Some(IMAGE_V2));
        assert_eq!(unresolved.len(), 1);
        assert_eq!(
            unresolved[0].1.get("machineType").map(String::as_str),
            Some(url("zones/twilight-a/machineTypes/machine_type_1").as_str())
        );
        assert!(!unresolved[0].1.contains_key("image"));
    }

    fn setup() -> FakeCompute {
        let api = FakeCompute::new();
        api.add_resource(resource(IMAGE_V1, Some(DeprecationState::Obsolete), Some(IMAGE_V2)))
            .add_resource(resource(IMAGE_V2, None, None))
            .add_resource(machine_type("twilight-a", "machine_type_1"));
        api
    }

    #[tokio::test]
    async fn test_download_spans_several_batches() {
        let api = FakeCompute::new();
        api.add_resource(machine_type("twilight-a", "machine_type_1"));
        let mut downloader = DependencyDownloader::new(&api);
        for n in 0..BATCH_SIZE + 2 {
            let image = url(&format!("global/images/image-{n}"));
            api.add_resource(resource(&image, None, None));
            downloader.add_instance(&Instance {
                image: Some(image),
                ..instance(&format!("i{n}"), "twilight-a", "machine_type_1", &[])
            });
        }

        let (resources, errors) = downloader.download().await;

        assert!(errors.is_empty());
        assert_eq!(resources.len(), BATCH_SIZE + 3);
        // Each URL is fetched once even though every instance shares the machine type.
        assert_eq!(api.calls_to("fetch:").len(), BATCH_SIZE + 3);
    }

    #[tokio::test]
    async fn test_check_deprecated_resources_replaces_when_allowed() {
        let api = setup();
        let instances = check_deprecated_resources(&api, vec![lana(IMAGE_V1)], true)
            .await
            .unwrap();
        assert_eq!(instances[0].image.as_deref(), Some(IMAGE_V2));
        assert_eq!(api.calls_to("fetch:").len(), 3);
    }

    #[tokio::test]
    async fn test_check_deprecated_resources_is_opt_in() {
        let api = setup();
        let err = check_deprecated_resources(&api, vec![lana(IMAGE_V1)], false)
            .await
            .unwrap_err();
        let message = err.to_string();
        assert!(message.starts_with("Move aborted.\nCannot find replacement"));
        assert!(message.contains("projects/my-project/zones/twilight-a/instances/lana:"));
        assert!(message.contains("    image: projects/os/global/images/v1"));
        assert!(message.ends_with("Consider running with --replace_deprecated"));
    }

    #[tokio::test]
    async fn test_check_deprecated_resources_passes_current_dependencies() {
        let api = setup();
        let original = lana(IMAGE_V2);
        let instances = check_deprecated_resources(&api, vec![original.clone()], false)
            .await
            .unwrap();
        assert_eq!(instances, vec![original]);
    }

    #[tokio::test]
    async fn test_check_deprecated_resources_reports_fetch_errors() {
        let api = FakeCompute::new();
        let err = check_deprecated_resources(&api, vec![lana(IMAGE_V1)], true)
            .await
            .unwrap_err();
        match err {
            Error::Step { step, errors } => {
                assert_eq!(step, "checking resource deprecation");
                assert_eq!(errors.len(), 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
