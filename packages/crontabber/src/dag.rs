//! Dependency-ordered job sequencing.
//!
//! Reorders descriptors so every job runs after all of its dependencies.
//! The sort is stable: jobs with no ordering constraint between them keep
//! their configured order.

use std::collections::HashSet;

use crate::error::CronError;
use crate::job::JobDescriptor;

/// Topologically order `descriptors` by their `depends_on` edges.
pub fn reorder(descriptors: Vec<JobDescriptor>) -> Result<Vec<JobDescriptor>, CronError> {
    let known: HashSet<&str> = descriptors
        .iter()
        .map(|descriptor| descriptor.app_name.as_str())
        .collect();
    for descriptor in &descriptors {
        for dependency in &descriptor.depends_on {
            if !known.contains(dependency.as_str()) {
                return Err(CronError::MissingDependency {
                    job: descriptor.app_name.clone(),
                    dependency: dependency.clone(),
                });
            }
        }
    }

    let mut remaining = descriptors;
    let mut ordered = Vec::with_capacity(remaining.len());
    let mut emitted: HashSet<String> = HashSet::new();

    while !remaining.is_empty() {
        // take the first job whose dependencies have all been emitted;
        // "first" keeps the order stable among unconstrained jobs
        let ready = remaining.iter().position(|descriptor| {
            descriptor
                .depends_on
                .iter()
                .all(|dependency| emitted.contains(dependency))
        });
        match ready {
            Some(index) => {
                let descriptor = remaining.remove(index);
                emitted.insert(descriptor.app_name.clone());
                ordered.push(descriptor);
            }
            None => {
                let cycle = remaining
                    .iter()
                    .map(|descriptor| descriptor.app_name.clone())
                    .collect();
                return Err(CronError::CyclicDependency(cycle));
            }
        }
    }
    Ok(ordered)
}
