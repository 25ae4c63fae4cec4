use crate::EndSessionEndpoint;
use url::Url;

pub(crate) fn create_logout_url(
    end_session_endpoint: EndSessionEndpoint,
    id_token: Option<&str>,
    post_logout_redirect_uri: Option<&Url>,
) -> Url {
    let mut logout_url: Url = end_session_endpoint;
    if let Some(post_logout_redirect_uri) = post_logout_redirect_uri {
        logout_url.query_pairs_mut().append_pair(
            "post_logout_redirect_uri",
            post_logout_redirect_uri.as_str(),
        );
    }
    if let Some(id_token) = id_token {
        logout_url
            .query_pairs_mut()
            .append_pair("id_token_hint", id_token);
    }
    logout_url
}
