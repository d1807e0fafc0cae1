//! Partition one snapshot's comments into their four contiguous segments.

use crate::document::Comment;

use super::KINDS;

/// Split a document's comments into `[normal, protected, title, code]`.
///
/// A document lays its comments out as four back-to-back runs. Title and
/// code runs carry pool tags 1 and 2 at the tail; the protected run is not
/// tagged and is found where the otherwise ascending IDs reset: the last
/// comment before the run has a larger ID than the first comment inside it.
///
/// If comments inside any run are unsorted the output is undefined.
pub fn digest(cmts: &[Comment]) -> [&[Comment]; KINDS] {
    let len = cmts.len();
    let mut ifront = len;
    let mut irear;

    irear = ifront;
    for i in (0..irear).rev() {
        if cmts[i].pool != 2 {
            ifront = i + 1;
            break;
        }
    }
    let code = &cmts[ifront..irear];

    irear = ifront;
    for i in (0..irear).rev() {
        if cmts[i].pool != 1 {
            ifront = i + 1;
            break;
        }
    }
    let title = &cmts[ifront..irear];

    irear = ifront;
    let mut last_id = u64::MAX;
    for i in (0..irear).rev() {
        if cmts[i].id > last_id {
            ifront = i + 1;
            break;
        }
        last_id = cmts[i].id;
    }
    let protected = &cmts[ifront..irear];
    let normal = &cmts[..ifront];

    [normal, protected, title, code]
}

/// Combined size of the first comment pool (normal + protected), the
/// quantity a snapshot's `maxlimit` caps.
pub fn pool_one_len(segments: &[Vec<Comment>; KINDS]) -> usize {
    segments[0].len() + segments[1].len()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmt(id: u64, pool: u32) -> Comment {
        let raw = format!("0,1,25,0,{id},{pool},user,{id}");
        Comment::parse(&raw, String::new()).unwrap()
    }

    fn ids(seg: &[Comment]) -> Vec<u64> {
        seg.iter().map(|c| c.id).collect()
    }

    #[test]
    fn all_four_segments_are_found() {
        let cmts: Vec<Comment> = [(3, 0), (6, 0), (9, 0), (2, 0), (5, 0), (8, 0), (1, 1), (4, 2), (7, 2)]
            .iter()
            .map(|&(id, pool)| cmt(id, pool))
            .collect();
        let [normal, protected, title, code] = digest(&cmts);
        assert_eq!(ids(normal), vec![3, 6, 9]);
        assert_eq!(ids(protected), vec![2, 5, 8]);
        assert_eq!(ids(title), vec![1]);
        assert_eq!(ids(code), vec![4, 7]);
    }

    #[test]
    fn equal_ids_do_not_split_the_normal_run() {
        let cmts: Vec<Comment> = [(3, 0), (6, 0), (9, 0), (9, 0), (7, 2)]
            .iter()
            .map(|&(id, pool)| cmt(id, pool))
            .collect();
        let [normal, protected, title, code] = digest(&cmts);
        assert_eq!(ids(normal), vec![3, 6, 9, 9]);
        assert!(protected.is_empty());
        assert!(title.is_empty());
        assert_eq!(ids(code), vec![7]);
    }

    #[test]
    fn id_reset_marks_protected_boundary() {
        let cmts = vec![cmt(2, 0), cmt(1, 0)];
        let [normal, protected, title, code] = digest(&cmts);
        assert_eq!(ids(normal), vec![2]);
        assert_eq!(ids(protected), vec![1]);
        assert!(title.is_empty());
        assert!(code.is_empty());
    }

    #[test]
    fn title_without_code_is_recognized() {
        let cmts = vec![cmt(1, 0), cmt(7, 1)];
        let [normal, protected, title, code] = digest(&cmts);
        assert_eq!(ids(normal), vec![1]);
        assert!(protected.is_empty());
        assert_eq!(ids(title), vec![7]);
        assert!(code.is_empty());
    }

    #[test]
    fn fully_monotonic_document_is_all_normal() {
        let cmts: Vec<Comment> = (1..=5).map(|id| cmt(id, 0)).collect();
        let [normal, protected, title, code] = digest(&cmts);
        assert_eq!(normal.len(), 5);
        assert!(protected.is_empty() && title.is_empty() && code.is_empty());
    }

    #[test]
    fn empty_document_digests_to_empty_segments() {
        let [normal, protected, title, code] = digest(&[]);
        assert!(normal.is_empty() && protected.is_empty() && title.is_empty() && code.is_empty());
    }
}
