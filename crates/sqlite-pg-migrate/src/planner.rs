//! Table migration planning.
//!
//! Orders tables so every table comes after the tables it depends on. The
//! sort is Kahn's algorithm with ties broken by declaration order, so the
//! same configuration always yields the same plan.

use std::collections::{BTreeSet, HashMap};

use serde::Serialize;

use crate::core::schema::TableSpec;
use crate::error::{MigrateError, Result};

/// An ordered, read-only sequence of table specs.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationPlan {
    tables: Vec<TableSpec>,
}

impl MigrationPlan {
    /// Tables in migration order.
    pub fn tables(&self) -> &[TableSpec] {
        &self.tables
    }

    /// Table names in migration order.
    pub fn names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&TableSpec> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Every table that transitively depends on `name`.
    pub fn dependents_of(&self, name: &str) -> Vec<&str> {
        let mut affected: Vec<&str> = Vec::new();
        // Plan order guarantees dependents come later, so one pass suffices.
        for table in &self.tables {
            if table.name == name {
                continue;
            }
            let hit = table
                .all_dependencies()
                .iter()
                .any(|d| d == name || affected.contains(&d.as_str()));
            if hit {
                affected.push(&table.name);
            }
        }
        affected
    }
}

/// Build a migration plan from table specs.
///
/// Dependencies are the declared `depends_on` tables plus every table a
/// foreign key references. Fails with [`MigrateError::UnknownDependency`] if a
/// dependency is not among `specs`, and with
/// [`MigrateError::CyclicDependency`] if the graph has a cycle (including a
/// table depending on itself).
pub fn plan(specs: &[TableSpec]) -> Result<MigrationPlan> {
    let index: HashMap<&str, usize> = specs
        .iter()
        .enumerate()
        .map(|(i, s)| (s.name.as_str(), i))
        .collect();

    // dependents[i] = tables that depend on i
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); specs.len()];
    let mut in_degree: Vec<usize> = vec![0; specs.len()];
    let mut deps_of: Vec<Vec<usize>> = vec![Vec::new(); specs.len()];

    for (i, spec) in specs.iter().enumerate() {
        for dep in spec.all_dependencies() {
            let Some(&j) = index.get(dep.as_str()) else {
                return Err(MigrateError::UnknownDependency {
                    table: spec.name.clone(),
                    dependency: dep,
                });
            };
            if i == j {
                return Err(MigrateError::CyclicDependency {
                    tables: vec![spec.name.clone(), spec.name.clone()],
                });
            }
            dependents[j].push(i);
            deps_of[i].push(j);
            in_degree[i] += 1;
        }
    }

    let mut ready: BTreeSet<usize> = (0..specs.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(specs.len());

    while let Some(i) = ready.pop_first() {
        order.push(i);
        for &d in &dependents[i] {
            in_degree[d] -= 1;
            if in_degree[d] == 0 {
                ready.insert(d);
            }
        }
    }

    if order.len() != specs.len() {
        let remaining: Vec<usize> = (0..specs.len()).filter(|&i| in_degree[i] > 0).collect();
        return Err(MigrateError::CyclicDependency {
            tables: find_cycle(specs, &deps_of, &remaining),
        });
    }

    Ok(MigrationPlan {
        tables: order.into_iter().map(|i| specs[i].clone()).collect(),
    })
}

/// Walk dependencies among the unsorted tables until a table repeats.
fn find_cycle(specs: &[TableSpec], deps_of: &[Vec<usize>], remaining: &[usize]) -> Vec<String> {
    let mut path: Vec<usize> = Vec::new();
    let mut current = remaining[0];
    loop {
        if let Some(pos) = path.iter().position(|&p| p == current) {
            let mut cycle: Vec<String> = path[pos..].iter().map(|&i| specs[i].name.clone()).collect();
            cycle.push(specs[current].name.clone());
            return cycle;
        }
        path.push(current);
        // Every table left over has at least one unsorted dependency.
        match deps_of[current].iter().find(|d| remaining.contains(d)) {
            Some(&next) => current = next,
            None => return path.iter().map(|&i| specs[i].name.clone()).collect(),
        }
    }
}
