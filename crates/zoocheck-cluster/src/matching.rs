//! Client/server matching.
//!
//! Every server must be observable through exactly one client, and a client
//! can only serve a server it can reach. When some servers' clients are
//! stuck, [`Assignment::reassign`] searches augmenting paths over the
//! [`Reachability`] matrix: a stuck server takes any reachable client whose
//! current server is itself stuck, or whose current server can recursively
//! move to another reachable client.

use std::collections::BTreeSet;

/// Which clients each server can be reached from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reachability {
    n: usize,
    /// Row-major `[server][client]`.
    reachable: Vec<bool>,
}

impl Reachability {
    /// All pairs reachable.
    pub fn all(n: usize) -> Self {
        Self {
            n,
            reachable: vec![true; n * n],
        }
    }

    /// Marks the pair unusable.
    pub fn mark_unreachable(&mut self, server: usize, client: usize) {
        self.reachable[server * self.n + client] = false;
    }

    pub fn can_reach(&self, server: usize, client: usize) -> bool {
        self.reachable[server * self.n + client]
    }

    /// Returns every `(server, client)` pair marked unusable.
    pub fn unreachable_pairs(&self) -> Vec<(usize, usize)> {
        (0..self.n)
            .flat_map(|server| (0..self.n).map(move |client| (server, client)))
            .filter(|&(server, client)| !self.can_reach(server, client))
            .collect()
    }
}

/// A bijection between servers and clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    client_for_server: Vec<usize>,
    server_for_client: Vec<usize>,
}

impl Assignment {
    /// Client `i` serves server `i`.
    pub fn identity(n: usize) -> Self {
        Self {
            client_for_server: (0..n).collect(),
            server_for_client: (0..n).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.client_for_server.len()
    }

    pub fn is_empty(&self) -> bool {
        self.client_for_server.is_empty()
    }

    pub fn client_for(&self, server: usize) -> usize {
        self.client_for_server[server]
    }

    pub fn server_for(&self, client: usize) -> usize {
        self.server_for_client[client]
    }

    /// Finds new clients for `servers`, moving other servers' clients where
    /// needed.
    ///
    /// Returns false, leaving the assignment untouched, if no total
    /// assignment over reachable pairs exists.
    pub fn reassign(&mut self, reach: &Reachability, servers: &[usize]) -> bool {
        let mut search = Search {
            reach,
            client_for_server: self.client_for_server.iter().copied().map(Some).collect(),
            server_for_client: self.server_for_client.iter().copied().map(Some).collect(),
            unmatched: servers.iter().copied().collect(),
        };

        for &server in servers {
            let mut visited = vec![false; self.len()];
            if !search.try_match(server, &mut visited) {
                return false;
            }
            search.unmatched.remove(&server);
        }

        let client_for_server: Option<Vec<usize>> = search.client_for_server.into_iter().collect();
        let server_for_client: Option<Vec<usize>> = search.server_for_client.into_iter().collect();
        match (client_for_server, server_for_client) {
            (Some(client_for_server), Some(server_for_client)) => {
                self.client_for_server = client_for_server;
                self.server_for_client = server_for_client;
                true
            }
            _ => false,
        }
    }
}

struct Search<'a> {
    reach: &'a Reachability,
    client_for_server: Vec<Option<usize>>,
    server_for_client: Vec<Option<usize>>,
    unmatched: BTreeSet<usize>,
}

impl Search<'_> {
    fn try_match(&mut self, server: usize, visited: &mut [bool]) -> bool {
        for client in 0..visited.len() {
            if !self.reach.can_reach(server, client) || visited[client] {
                continue;
            }
            visited[client] = true;

            let free = match self.server_for_client[client] {
                None => true,
                Some(other) => self.unmatched.contains(&other) || self.try_match(other, visited),
            };
            if free {
                self.assign(server, client);
                return true;
            }
        }
        false
    }

    fn assign(&mut self, server: usize, client: usize) {
        if let Some(previous) = self.client_for_server[server] {
            if self.server_for_client[previous] == Some(server) {
                self.server_for_client[previous] = None;
            }
        }
        self.client_for_server[server] = Some(client);
        self.server_for_client[client] = Some(server);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn is_valid(assignment: &Assignment, reach: &Reachability) -> bool {
        (0..assignment.len()).all(|server| {
            let client = assignment.client_for(server);
            reach.can_reach(server, client) && assignment.server_for(client) == server
        })
    }

    fn perfect_matching_exists(reach: &Reachability, n: usize) -> bool {
        fn go(reach: &Reachability, server: usize, n: usize, used: &mut [bool]) -> bool {
            if server == n {
                return true;
            }
            for client in 0..n {
                if !used[client] && reach.can_reach(server, client) {
                    used[client] = true;
                    if go(reach, server + 1, n, used) {
                        return true;
                    }
                    used[client] = false;
                }
            }
            false
        }
        go(reach, 0, n, &mut vec![false; n])
    }

    #[test]
    fn test_stuck_server_takes_free_client_by_rotation() {
        let mut reach = Reachability::all(3);
        reach.mark_unreachable(0, 0);
        let mut assignment = Assignment::identity(3);

        assert!(assignment.reassign(&reach, &[0]));
        assert_ne!(assignment.client_for(0), 0);
        assert!(is_valid(&assignment, &reach));
    }

    #[test]
    fn test_two_stuck_servers_swap_clients() {
        let mut reach = Reachability::all(2);
        reach.mark_unreachable(0, 0);
        reach.mark_unreachable(1, 1);
        let mut assignment = Assignment::identity(2);

        assert!(assignment.reassign(&reach, &[0, 1]));
        assert_eq!(assignment.client_for(0), 1);
        assert_eq!(assignment.client_for(1), 0);
    }

    #[test]
    fn test_failure_leaves_assignment_untouched() {
        let mut reach = Reachability::all(2);
        reach.mark_unreachable(0, 0);
        reach.mark_unreachable(0, 1);
        let mut assignment = Assignment::identity(2);

        assert!(!assignment.reassign(&reach, &[0]));
        assert_eq!(assignment, Assignment::identity(2));
        assert_eq!(reach.unreachable_pairs(), vec![(0, 0), (0, 1)]);
    }

    fn arb_case() -> impl Strategy<Value = (usize, Vec<bool>, Vec<bool>)> {
        (1usize..=5).prop_flat_map(|n| {
            (
                Just(n),
                prop::collection::vec(any::<bool>(), n * n),
                prop::collection::vec(any::<bool>(), n),
            )
        })
    }

    proptest! {
        #[test]
        fn prop_reassign_succeeds_iff_perfect_matching_exists((n, cells, requested) in arb_case()) {
            let mut reach = Reachability::all(n);
            let servers: Vec<usize> = (0..n).filter(|&s| requested[s]).collect();
            for server in 0..n {
                for client in 0..n {
                    // Servers that are not reassigned keep a usable edge to
                    // their current client.
                    let keep = !requested[server] && server == client;
                    if !cells[server * n + client] && !keep {
                        reach.mark_unreachable(server, client);
                    }
                }
            }

            let mut assignment = Assignment::identity(n);
            let found = assignment.reassign(&reach, &servers);

            prop_assert_eq!(found, perfect_matching_exists(&reach, n));
            if found {
                prop_assert!(is_valid(&assignment, &reach));
            } else {
                prop_assert_eq!(assignment, Assignment::identity(n));
            }
        }
    }
}
