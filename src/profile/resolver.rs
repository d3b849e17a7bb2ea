use super::{Environment, ProfileConfigFile, ProfileResolution, ProfileSource};

const PROFILE_VARS: [&str; 2] = ["AWS_PROFILE", "AWS_DEFAULT_PROFILE"];
const REGION_VARS: [&str; 2] = ["AWS_REGION", "AWS_DEFAULT_REGION"];

fn non_empty<'a>(value: Option<&'a str>) -> Option<&'a str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn first_env<'a>(environment: &'a Environment, vars: &[&str]) -> Option<&'a str> {
    vars.iter()
        .find_map(|var| non_empty(environment.get(*var).map(String::as_str)))
}

/// Resolve the profile for a deployment.
///
/// Priority: an explicit profile wins, then a profile named in the
/// environment, and otherwise no profile at all (the SDK default chain).
/// The region comes from the environment when set there, else from the
/// config file's section for the chosen profile (or `default`).
///
/// Pure: the config file must already be parsed by the caller.
pub fn resolve(
    explicit: Option<&str>,
    environment: &Environment,
    config_file: Option<&ProfileConfigFile>,
) -> ProfileResolution {
    let (profile, source) = match non_empty(explicit) {
        Some(profile) => (Some(profile), ProfileSource::Explicit),
        None => match first_env(environment, &PROFILE_VARS) {
            Some(profile) => (Some(profile), ProfileSource::Environment),
            None => (None, ProfileSource::DefaultChain),
        },
    };

    let region = first_env(environment, &REGION_VARS)
        .or_else(|| config_file.and_then(|file| file.region(profile.unwrap_or("default"))))
        .map(str::to_string);

    ProfileResolution {
        profile: profile.map(str::to_string),
        source,
        region,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> Environment {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_explicit_wins() {
        let resolution = resolve(
            Some("prod"),
            &env(&[("AWS_PROFILE", "dev"), ("AWS_REGION", "us-west-2")]),
            None,
        );
        assert_eq!(resolution.profile.as_deref(), Some("prod"));
        assert_eq!(resolution.source, ProfileSource::Explicit);
        assert_eq!(resolution.region.as_deref(), Some("us-west-2"));
    }

    #[test]
    fn test_environment_profile() {
        let resolution = resolve(None, &env(&[("AWS_PROFILE", "dev")]), None);
        assert_eq!(resolution.profile.as_deref(), Some("dev"));
        assert_eq!(resolution.source, ProfileSource::Environment);
        assert_eq!(resolution.region, None);

        let resolution = resolve(Some("  "), &env(&[("AWS_DEFAULT_PROFILE", "legacy")]), None);
        assert_eq!(resolution.profile.as_deref(), Some("legacy"));
        assert_eq!(resolution.source, ProfileSource::Environment);
    }

    #[test]
    fn test_default_chain() {
        let resolution = resolve(None, &env(&[("AWS_PROFILE", "")]), None);
        assert_eq!(resolution.profile, None);
        assert_eq!(resolution.source, ProfileSource::DefaultChain);
        assert!(resolution.uses_default_chain());
    }

    #[test]
    fn test_priority_over_all_combinations() {
        for explicit in [None, Some("cli")] {
            for env_profile in [None, Some("from-env")] {
                let mut environment = Environment::new();
                if let Some(p) = env_profile {
                    environment.insert("AWS_PROFILE".into(), p.into());
                }
                let resolution = resolve(explicit, &environment, None);
                let expected = match (explicit, env_profile) {
                    (Some(p), _) => (Some(p), ProfileSource::Explicit),
                    (None, Some(p)) => (Some(p), ProfileSource::Environment),
                    (None, None) => (None, ProfileSource::DefaultChain),
                };
                assert_eq!(
                    (resolution.profile.as_deref(), resolution.source),
                    expected
                );
            }
        }
    }

    #[test]
    fn test_region_fallbacks() {
        let file = ProfileConfigFile::parse(
            "[default]\nregion = us-east-1\n[profile staging]\nregion = eu-west-1\n",
        );

        let resolution = resolve(Some("staging"), &Environment::new(), Some(&file));
        assert_eq!(resolution.region.as_deref(), Some("eu-west-1"));

        let resolution = resolve(None, &Environment::new(), Some(&file));
        assert_eq!(resolution.region.as_deref(), Some("us-east-1"));

        let resolution = resolve(
            Some("staging"),
            &env(&[("AWS_DEFAULT_REGION", "ap-south-1")]),
            Some(&file),
        );
        assert_eq!(resolution.region.as_deref(), Some("ap-south-1"));
    }
}
