//! Complexity and size distributions of the repository estate

use serde::{Deserialize, Serialize};

use crate::models::Repository;

const MB: u64 = 1024 * 1024;
const GB: u64 = 1024 * MB;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplexityDistribution {
    /// score 0..=2
    pub simple: u64,
    /// score 3..=5
    pub medium: u64,
    /// score 6..=8
    pub complex: u64,
    /// score 9 and above
    pub very_complex: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeDistribution {
    /// under 100 MB
    pub small: u64,
    /// under 1 GB
    pub medium: u64,
    /// under 5 GB
    pub large: u64,
    pub very_large: u64,
}

pub fn complexity_distribution<'a, I>(repos: I) -> ComplexityDistribution
where
    I: IntoIterator<Item = &'a Repository>,
{
    let mut dist = ComplexityDistribution::default();
    for repo in repos {
        match repo.complexity_score {
            0..=2 => dist.simple += 1,
            3..=5 => dist.medium += 1,
            6..=8 => dist.complex += 1,
            _ => dist.very_complex += 1,
        }
    }
    dist
}

pub fn size_distribution<'a, I>(repos: I) -> SizeDistribution
where
    I: IntoIterator<Item = &'a Repository>,
{
    let mut dist = SizeDistribution::default();
    for repo in repos {
        match repo.total_size_bytes {
            s if s < 100 * MB => dist.small += 1,
            s if s < GB => dist.medium += 1,
            s if s < 5 * GB => dist.large += 1,
            _ => dist.very_large += 1,
        }
    }
    dist
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourcePlatform;

    fn repo(name: &str, size: u64, score: u32) -> Repository {
        let mut repo = Repository::discovered(name, SourcePlatform::Github);
        repo.total_size_bytes = size;
        repo.complexity_score = score;
        repo
    }

    #[test]
    fn test_distributions() {
        let repos = vec![
            repo("acme/a", 10 * MB, 0),
            repo("acme/b", 500 * MB, 4),
            repo("acme/c", 2 * GB, 7),
            repo("acme/d", 20 * GB, 11),
        ];

        let complexity = complexity_distribution(&repos);
        assert_eq!(
            complexity,
            ComplexityDistribution {
                simple: 1,
                medium: 1,
                complex: 1,
                very_complex: 1
            }
        );

        let size = size_distribution(&repos);
        assert_eq!(size.small, 1);
        assert_eq!(size.very_large, 1);
    }
}
