use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;

use super::query::{IndexPath, ViewSnapshot};
use crate::storage::{CommitRecord, CommitRef};

/// 分组变化，按标题匹配
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SectionChange {
    /// `at` 为旧快照中的分组下标
    Delete { title: Option<String>, at: usize },
    /// `at` 为新快照中的分组下标
    Insert { title: Option<String>, at: usize },
}

/// 行变化
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum RowChange {
    /// 旧快照位置
    Delete { commit: CommitRef, at: IndexPath },
    /// 新快照位置
    Insert { commit: CommitRef, at: IndexPath },
    /// 相对位置不变、内容变化，旧快照位置
    Update { commit: CommitRef, at: IndexPath },
    /// 相对顺序或所属分组变化
    Move {
        commit: CommitRef,
        from: IndexPath,
        to: IndexPath,
    },
}

impl RowChange {
    pub fn commit(&self) -> &CommitRef {
        match self {
            RowChange::Delete { commit, .. }
            | RowChange::Insert { commit, .. }
            | RowChange::Update { commit, .. }
            | RowChange::Move { commit, .. } => commit,
        }
    }
}

impl fmt::Display for RowChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowChange::Delete { commit, at } => write!(f, "- {} at {}", commit, at),
            RowChange::Insert { commit, at } => write!(f, "+ {} at {}", commit, at),
            RowChange::Update { commit, at } => write!(f, "~ {} at {}", commit, at),
            RowChange::Move { commit, from, to } => write!(f, "> {} {} -> {}", commit, from, to),
        }
    }
}

/// 两次快照之间的差异
///
/// 行变化按删除、插入、移动、更新分组输出；删除与更新按旧快照顺序，插入与移动按新快照顺序。
/// 所在分组被整体删除或新增的行同样会单独列出。
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ViewDiff {
    pub sections: Vec<SectionChange>,
    pub rows: Vec<RowChange>,
}

impl ViewDiff {
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty() && self.rows.is_empty()
    }

    pub fn deletes(&self) -> impl Iterator<Item = &RowChange> {
        self.rows.iter().filter(|c| matches!(c, RowChange::Delete { .. }))
    }

    pub fn inserts(&self) -> impl Iterator<Item = &RowChange> {
        self.rows.iter().filter(|c| matches!(c, RowChange::Insert { .. }))
    }

    pub fn updates(&self) -> impl Iterator<Item = &RowChange> {
        self.rows.iter().filter(|c| matches!(c, RowChange::Update { .. }))
    }

    pub fn moves(&self) -> impl Iterator<Item = &RowChange> {
        self.rows.iter().filter(|c| matches!(c, RowChange::Move { .. }))
    }
}

impl fmt::Display for ViewDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for change in &self.sections {
            match change {
                SectionChange::Delete { title, at } => {
                    writeln!(f, "- section {} ({})", at, title.as_deref().unwrap_or("-"))?
                }
                SectionChange::Insert { title, at } => {
                    writeln!(f, "+ section {} ({})", at, title.as_deref().unwrap_or("-"))?
                }
            }
        }
        for change in &self.rows {
            writeln!(f, "{}", change)?;
        }
        Ok(())
    }
}

struct RowInfo<'a> {
    path: IndexPath,
    /// 按显示顺序的全局序号
    ordinal: usize,
    title: Option<&'a str>,
    record: &'a CommitRecord,
}

fn index_rows(snapshot: &ViewSnapshot) -> HashMap<&str, RowInfo<'_>> {
    snapshot
        .rows()
        .enumerate()
        .map(|(ordinal, (path, record))| {
            let title = snapshot.sections()[path.section].title.as_deref();
            (
                record.sha(),
                RowInfo {
                    path,
                    ordinal,
                    title,
                    record,
                },
            )
        })
        .collect()
}

/// 计算 `old` 到 `new` 的差异
pub fn diff_snapshots(old: &ViewSnapshot, new: &ViewSnapshot) -> ViewDiff {
    let mut diff = ViewDiff::default();

    let old_titles: HashSet<Option<&str>> = old.sections().iter().map(|s| s.title.as_deref()).collect();
    let new_titles: HashSet<Option<&str>> = new.sections().iter().map(|s| s.title.as_deref()).collect();

    for (at, section) in old.sections().iter().enumerate() {
        if !new_titles.contains(&section.title.as_deref()) {
            diff.sections.push(SectionChange::Delete {
                title: section.title.clone(),
                at,
            });
        }
    }
    for (at, section) in new.sections().iter().enumerate() {
        if !old_titles.contains(&section.title.as_deref()) {
            diff.sections.push(SectionChange::Insert {
                title: section.title.clone(),
                at,
            });
        }
    }

    let old_rows = index_rows(old);
    let new_rows = index_rows(new);

    for (path, record) in old.rows() {
        if !new_rows.contains_key(record.sha()) {
            diff.rows.push(RowChange::Delete {
                commit: record.commit_ref(),
                at: path,
            });
        }
    }
    for (path, record) in new.rows() {
        if !old_rows.contains_key(record.sha()) {
            diff.rows.push(RowChange::Insert {
                commit: record.commit_ref(),
                at: path,
            });
        }
    }

    // 同组内保留的行，按新顺序排列其旧序号
    let mut moved = Vec::new();
    let mut retained = Vec::new();
    for (path, record) in new.rows() {
        if let Some(before) = old_rows.get(record.sha()) {
            let after_title = new.sections()[path.section].title.as_deref();
            if before.title == after_title {
                retained.push((before, path));
            } else {
                moved.push((before, path));
            }
        }
    }

    let ordinals: Vec<usize> = retained.iter().map(|(before, _)| before.ordinal).collect();
    let stable = longest_increasing_subsequence(&ordinals);

    let mut updates = Vec::new();
    for (index, (before, to)) in retained.into_iter().enumerate() {
        if !stable.contains(&index) {
            moved.push((before, to));
        } else if let Some(after) = new_rows.get(before.record.sha()) {
            if after.record != before.record {
                updates.push(before);
            }
        }
    }

    moved.sort_by_key(|(_, to)| *to);
    for (before, to) in moved {
        diff.rows.push(RowChange::Move {
            commit: before.record.commit_ref(),
            from: before.path,
            to,
        });
    }

    updates.sort_by_key(|before| before.ordinal);
    for before in updates {
        diff.rows.push(RowChange::Update {
            commit: before.record.commit_ref(),
            at: before.path,
        });
    }

    diff
}

/// 返回最长严格递增子序列各元素在 `values` 中的下标
fn longest_increasing_subsequence(values: &[usize]) -> HashSet<usize> {
    // tails[k]: 长度为 k+1 的递增子序列末尾元素的下标
    let mut tails: Vec<usize> = Vec::new();
    let mut previous: Vec<Option<usize>> = vec![None; values.len()];

    for (i, &value) in values.iter().enumerate() {
        let position = tails.partition_point(|&t| values[t] < value);
        if position > 0 {
            previous[i] = Some(tails[position - 1]);
        }
        if position == tails.len() {
            tails.push(i);
        } else {
            tails[position] = i;
        }
    }

    let mut result = HashSet::with_capacity(tails.len());
    let mut cursor = tails.last().copied();
    while let Some(i) = cursor {
        result.insert(i);
        cursor = previous[i];
    }
    result
}
