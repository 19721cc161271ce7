//! Translation of a server request into a panel creation spec.

use crate::panel::{AllocationSpec, BuildSpec, FeatureLimits, Limits, ServerSpec};
use crate::types::{Allocation, Game, Node, Resources, ServerForm, User};

/// Block IO weight given to every server.
const DEFAULT_IO_WEIGHT: u32 = 500;

/// Builds the [`ServerSpec`] the panel needs to create a server.
///
/// Implementations must be deterministic: identical inputs produce an
/// identical spec.
pub trait DeployConfigBuilder: Send + Sync {
    /// Build the creation spec.
    fn build(
        &self,
        user: &User,
        game: &Game,
        node: &Node,
        allocation: &Allocation,
        form: &ServerForm,
    ) -> ServerSpec;
}

/// Default builder for Pterodactyl-style panels.
#[derive(Debug, Clone, Copy, Default)]
pub struct PanelSpecBuilder;

impl PanelSpecBuilder {
    /// Server name derived from the game and owner.
    #[must_use]
    pub fn server_name(game: &Game, user: &User) -> String {
        format!("{}-{}", slug(&game.name), slug(&user.username))
    }
}

impl DeployConfigBuilder for PanelSpecBuilder {
    fn build(
        &self,
        user: &User,
        game: &Game,
        _node: &Node,
        allocation: &Allocation,
        form: &ServerForm,
    ) -> ServerSpec {
        ServerSpec {
            name: Self::server_name(game, user),
            user: user.panel_user_id,
            egg: game.egg_id,
            docker_image: game.docker_image.clone(),
            startup: game.startup.clone(),
            environment: game.environment.clone(),
            limits: limits(&form.resources),
            feature_limits: feature_limits(&form.resources),
            allocation: AllocationSpec {
                default: allocation.id,
            },
            start_on_completion: true,
        }
    }
}

/// Build limits for a resize of an existing server.
#[must_use]
pub fn build_spec(allocation: &Allocation, resources: &Resources) -> BuildSpec {
    BuildSpec {
        allocation: allocation.id,
        limits: limits(resources),
        feature_limits: feature_limits(resources),
    }
}

const fn limits(resources: &Resources) -> Limits {
    Limits {
        memory: resources.memory,
        swap: 0,
        disk: resources.disk,
        io: DEFAULT_IO_WEIGHT,
        cpu: resources.cpu,
    }
}

const fn feature_limits(resources: &Resources) -> FeatureLimits {
    FeatureLimits {
        databases: resources.databases,
        allocations: 1,
        backups: 0,
    }
}

fn slug(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('-') && !out.is_empty() {
            out.push('-');
        }
    }
    out.trim_end_matches('-').to_owned()
}
