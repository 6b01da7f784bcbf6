//! 依赖图检查
//!
//! 图以 "任务id → 尚未完成的依赖id集合" 表示，只包含等待中的任务。
//! 依赖不在图中的任务视为外部依赖，不参与环判定。

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

/// 新任务加入后是否形成环
///
/// 新任务尚未进入图，环只可能经由 "某个等待任务（传递地）依赖新任务" 形成。
/// 返回环上的路径（从新任务出发再回到新任务），无环时返回 `None`。
pub fn find_cycle(
    task_id: &str,
    dependencies: &BTreeSet<String>,
    graph: &HashMap<String, BTreeSet<String>>,
) -> Option<Vec<String>> {
    if dependencies.contains(task_id) {
        return Some(vec![task_id.to_string(), task_id.to_string()]);
    }

    let mut visited: HashSet<&str> = HashSet::new();
    // (当前节点, 到达它的路径)
    let mut stack: Vec<(&str, Vec<&str>)> = dependencies
        .iter()
        .map(|dep| (dep.as_str(), vec![task_id, dep.as_str()]))
        .collect();

    while let Some((node, path)) = stack.pop() {
        if !visited.insert(node) {
            continue;
        }
        let Some(next) = graph.get(node) else {
            continue;
        };
        for dep in next {
            if dep == task_id {
                let mut cycle: Vec<String> = path.iter().map(|s| s.to_string()).collect();
                cycle.push(task_id.to_string());
                return Some(cycle);
            }
            if !visited.contains(dep.as_str()) {
                let mut extended = path.clone();
                extended.push(dep.as_str());
                stack.push((dep.as_str(), extended));
            }
        }
    }
    None
}

/// 永远无法就绪的任务：位于环上，或传递地依赖环上的任务
///
/// 拓扑排序（边方向为 依赖 → 依赖者），排序结束后剩余的节点即为结果。
pub fn deadlocked_tasks(graph: &HashMap<String, BTreeSet<String>>) -> Vec<String> {
    let mut in_degree: HashMap<&str, usize> = HashMap::new();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

    for (node, deps) in graph {
        let internal = deps.iter().filter(|d| graph.contains_key(d.as_str()));
        let mut count = 0;
        for dep in internal {
            dependents.entry(dep.as_str()).or_default().push(node.as_str());
            count += 1;
        }
        in_degree.insert(node.as_str(), count);
    }

    let mut queue: VecDeque<&str> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(node, _)| *node)
        .collect();

    while let Some(node) = queue.pop_front() {
        in_degree.remove(node);
        if let Some(children) = dependents.get(node) {
            for child in children {
                if let Some(degree) = in_degree.get_mut(child) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(*child);
                    }
                }
            }
        }
    }

    let mut remaining: Vec<String> = in_degree.keys().map(|s| s.to_string()).collect();
    remaining.sort();
    remaining
}

/// 一个任务（传递地）仍在等待的全部依赖，按广度优先顺序
pub fn transitive_dependencies(
    task_id: &str,
    graph: &HashMap<String, BTreeSet<String>>,
) -> Vec<String> {
    let mut visited = HashSet::new();
    let mut queue = VecDeque::new();
    let mut result = Vec::new();

    if let Some(deps) = graph.get(task_id) {
        for dep in deps {
            if visited.insert(dep.as_str()) {
                queue.push_back(dep.as_str());
            }
        }
    }

    while let Some(current) = queue.pop_front() {
        result.push(current.to_string());
        if let Some(deps) = graph.get(current) {
            for dep in deps {
                if visited.insert(dep.as_str()) {
                    queue.push_back(dep.as_str());
                }
            }
        }
    }
    result
}
